use std::collections::HashMap;

use tokio::sync::RwLock;
use trendpulse_core::{EntityId, ScoreSnapshot};

/// Latest [`ScoreSnapshot`] per entity.
#[derive(Debug, Default)]
pub struct SnapshotBook {
    latest: RwLock<HashMap<EntityId, ScoreSnapshot>>,
}

impl SnapshotBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `snapshot` unless a newer one for the same entity is already
    /// held. Returns whether it was stored.
    pub async fn publish(&self, snapshot: ScoreSnapshot) -> bool {
        let mut latest = self.latest.write().await;
        match latest.get(&snapshot.entity_id) {
            Some(current) if current.computed_at > snapshot.computed_at => false,
            _ => {
                latest.insert(snapshot.entity_id, snapshot);
                true
            }
        }
    }

    pub async fn get(&self, entity_id: EntityId) -> Option<ScoreSnapshot> {
        self.latest.read().await.get(&entity_id).cloned()
    }

    pub async fn all(&self) -> Vec<ScoreSnapshot> {
        self.latest.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.latest.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.latest.read().await.is_empty()
    }
}
