use chrono::{DateTime, Utc};
use thiserror::Error;
use trendpulse_core::EntityId;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engagement weight {weight} must be finite and at least 1")]
    InvalidWeight { weight: f64 },

    #[error("entity guess is blank")]
    BlankGuess,

    #[error("inconsistent state for entity {entity_id}: {reason}")]
    Inconsistent { entity_id: EntityId, reason: String },

    #[error("event observed at {observed_at} is ahead of the current window")]
    FutureEvent { observed_at: DateTime<Utc> },

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("query unavailable: {0}")]
    QueryUnavailable(String),
}

/// Cache failures are shared between single-flight waiters, hence `Clone`.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("timed out waiting for rebuild of cache key {key}")]
    RebuildTimeout { key: String },

    #[error("rebuild of cache key {key} failed: {reason}")]
    RebuildFailed { key: String, reason: String },

    #[error("cache codec error: {0}")]
    Codec(String),
}
