//! Postgres-backed implementations of the engine and ingest storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trendpulse_core::{CanonicalEntity, ScoreSnapshot};
use trendpulse_engine::{Persistence, PersistenceError, StoredWindow};
use trendpulse_ingest::{CheckpointStore, Cursor, IngestError};

use crate::{checkpoints, entities, snapshots, windows, DbError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn persistence_err(err: DbError) -> PersistenceError {
    PersistenceError(err.to_string())
}

#[async_trait]
impl Persistence for PgStore {
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>, PersistenceError> {
        let rows = entities::list_entities(&self.pool)
            .await
            .map_err(persistence_err)?;
        rows.into_iter()
            .map(|row| row.into_entity().map_err(persistence_err))
            .collect()
    }

    async fn upsert_entity(&self, entity: &CanonicalEntity) -> Result<(), PersistenceError> {
        entities::upsert_entity(&self.pool, entity)
            .await
            .map_err(persistence_err)
    }

    async fn save_window(&self, window: &StoredWindow) -> Result<(), PersistenceError> {
        windows::upsert_window(&self.pool, window)
            .await
            .map_err(persistence_err)
    }

    async fn load_windows(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredWindow>, PersistenceError> {
        let rows = windows::list_windows_since(&self.pool, since)
            .await
            .map_err(persistence_err)?;
        rows.into_iter()
            .map(|row| row.into_stored().map_err(persistence_err))
            .collect()
    }

    async fn save_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<(), PersistenceError> {
        let id = snapshots::insert_snapshot(&self.pool, snapshot)
            .await
            .map_err(persistence_err)?;
        tracing::debug!(snapshot_id = id, entity_id = snapshot.entity_id.0, "snapshot stored");
        Ok(())
    }

    async fn latest_snapshots(&self) -> Result<Vec<ScoreSnapshot>, PersistenceError> {
        let rows = snapshots::latest_snapshots(&self.pool)
            .await
            .map_err(persistence_err)?;
        rows.into_iter()
            .map(|row| row.into_snapshot().map_err(persistence_err))
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn load(&self, source: &str) -> Result<Option<Cursor>, IngestError> {
        let row = checkpoints::get_checkpoint(&self.pool, source)
            .await
            .map_err(|e| IngestError::Checkpoint(e.to_string()))?;
        Ok(row.map(|r| Cursor(r.cursor)))
    }

    async fn save(&self, source: &str, cursor: &Cursor) -> Result<(), IngestError> {
        checkpoints::save_checkpoint(&self.pool, source, &cursor.0)
            .await
            .map_err(|e| IngestError::Checkpoint(e.to_string()))
    }
}
