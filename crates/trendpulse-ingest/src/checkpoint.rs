use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::IngestError;
use crate::source::Cursor;

/// Durable store for the last fully processed cursor of each source.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, source: &str) -> Result<Option<Cursor>, IngestError>;

    async fn save(&self, source: &str, cursor: &Cursor) -> Result<(), IngestError>;
}

/// In-process checkpoint store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self, source: &str) -> Option<Cursor> {
        self.cursors.lock().await.get(source).cloned()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, source: &str) -> Result<Option<Cursor>, IngestError> {
        Ok(self.current(source).await)
    }

    async fn save(&self, source: &str, cursor: &Cursor) -> Result<(), IngestError> {
        self.cursors
            .lock()
            .await
            .insert(source.to_owned(), cursor.clone());
        Ok(())
    }
}
