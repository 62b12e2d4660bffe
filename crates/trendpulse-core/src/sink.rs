//! Handoff from the ingestion side to the aggregation side.

use async_trait::async_trait;
use thiserror::Error;

use crate::mention::MentionEvent;

#[derive(Debug, Error)]
#[error("mention sink rejected batch: {0}")]
pub struct SinkError(pub String);

/// Downstream consumer of validated mention events.
///
/// Ingestion hands each fetched page to the sink and only checkpoints the
/// page once `accept` returns `Ok`. Implementations must tolerate the same
/// page being delivered more than once.
#[async_trait]
pub trait MentionSink: Send + Sync {
    /// Accept one page worth of events, returning how many were counted.
    async fn accept(&self, events: Vec<MentionEvent>) -> Result<usize, SinkError>;
}
