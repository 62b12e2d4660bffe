//! Durable storage contract for the engine.
//!
//! The engine never talks to a database directly. `trendpulse-db` provides a
//! Postgres implementation; [`MemoryPersistence`] backs tests and runs without
//! `DATABASE_URL`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use trendpulse_core::{CanonicalEntity, EntityId, ScoreSnapshot};

use crate::aggregation::StoredWindow;

#[derive(Debug, Clone, Error)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>, PersistenceError>;

    /// Inserts or replaces the entity row, aliases included.
    async fn upsert_entity(&self, entity: &CanonicalEntity) -> Result<(), PersistenceError>;

    /// Upserts by `(entity_id, window_start, late)`.
    async fn save_window(&self, window: &StoredWindow) -> Result<(), PersistenceError>;

    /// Windows starting at or after `since`, oldest first.
    async fn load_windows(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredWindow>, PersistenceError>;

    async fn save_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<(), PersistenceError>;

    /// Most recent snapshot per entity.
    async fn latest_snapshots(&self) -> Result<Vec<ScoreSnapshot>, PersistenceError>;
}

type WindowRowKey = (EntityId, DateTime<Utc>, bool);

#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<EntityId, CanonicalEntity>,
    windows: BTreeMap<WindowRowKey, StoredWindow>,
    snapshots: HashMap<EntityId, Vec<ScoreSnapshot>>,
}

/// In-process [`Persistence`]. Can be switched into a failing mode to
/// exercise write-through retries.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl MemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    /// Number of snapshots written for `entity_id`.
    pub async fn snapshot_count(&self, entity_id: EntityId) -> usize {
        self.tables
            .lock()
            .await
            .snapshots
            .get(&entity_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>, PersistenceError> {
        self.check()?;
        Ok(self.tables.lock().await.entities.values().cloned().collect())
    }

    async fn upsert_entity(&self, entity: &CanonicalEntity) -> Result<(), PersistenceError> {
        self.check()?;
        self.tables
            .lock()
            .await
            .entities
            .insert(entity.entity_id, entity.clone());
        Ok(())
    }

    async fn save_window(&self, window: &StoredWindow) -> Result<(), PersistenceError> {
        self.check()?;
        let key = (
            window.window.entity_id,
            window.window.window_start,
            window.late,
        );
        self.tables.lock().await.windows.insert(key, window.clone());
        Ok(())
    }

    async fn load_windows(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredWindow>, PersistenceError> {
        self.check()?;
        let mut rows: Vec<StoredWindow> = self
            .tables
            .lock()
            .await
            .windows
            .values()
            .filter(|w| w.window.window_start >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|w| (w.window.window_start, w.window.entity_id, w.late));
        Ok(rows)
    }

    async fn save_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<(), PersistenceError> {
        self.check()?;
        self.tables
            .lock()
            .await
            .snapshots
            .entry(snapshot.entity_id)
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshots(&self) -> Result<Vec<ScoreSnapshot>, PersistenceError> {
        self.check()?;
        let tables = self.tables.lock().await;
        let mut latest: Vec<ScoreSnapshot> = tables
            .snapshots
            .values()
            .filter_map(|history| history.iter().max_by_key(|s| s.computed_at).cloned())
            .collect();
        latest.sort_by_key(|s| s.entity_id);
        Ok(latest)
    }
}
