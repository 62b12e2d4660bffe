//! Aggregation store: rolling per-entity, per-bucket mention counts.
//!
//! Each `(entity, bucket)` cell sits behind its own mutex, so concurrent
//! `record` calls for one window serialize while other windows proceed in
//! parallel. The outer maps are only write-locked to insert a new cell.
//!
//! Once a window is closed (`now > window_end + grace`) it is never mutated
//! again; events arriving for it are counted into a separate late window with
//! the same bounds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use trendpulse_core::{AggregationWindow, BucketSpec, EntityId};

use crate::clock::Clock;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub entity_id: EntityId,
    pub bucket: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Counted(WindowKey),
    /// The window had already closed; counted into its late window instead.
    Late(WindowKey),
}

/// A window as persisted: regular or late, sealed or still open.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWindow {
    pub window: AggregationWindow,
    pub late: bool,
    pub sealed: bool,
}

/// Result of [`AggregationStore::flush`].
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Regular windows that closed since the previous flush.
    pub newly_sealed: Vec<AggregationWindow>,
    /// Every window changed since the previous flush, for write-through.
    pub changed: Vec<StoredWindow>,
}

#[derive(Debug)]
struct WindowCell {
    window: AggregationWindow,
    sealed: bool,
    dirty: bool,
}

impl WindowCell {
    fn add(&mut self, weight: f64) {
        self.window.mention_count += 1;
        self.window.weighted_count += weight;
        self.dirty = true;
    }
}

type Cell = Arc<Mutex<WindowCell>>;
type Cells = HashMap<EntityId, BTreeMap<i64, Cell>>;

pub struct AggregationStore {
    bucket: BucketSpec,
    retention_windows: usize,
    clock: Arc<dyn Clock>,
    windows: RwLock<Cells>,
    late: RwLock<Cells>,
}

impl AggregationStore {
    #[must_use]
    pub fn new(bucket: BucketSpec, retention_windows: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket,
            retention_windows: retention_windows.max(1),
            clock,
            windows: RwLock::new(HashMap::new()),
            late: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> BucketSpec {
        self.bucket
    }

    /// Checks an event before it is counted anywhere.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidWeight`] for a non-finite weight or one below 1.
    /// - [`EngineError::FutureEvent`] when `observed_at` is more than one
    ///   bucket width ahead of the clock.
    pub fn validate(&self, observed_at: DateTime<Utc>, weight: f64) -> Result<(), EngineError> {
        if !weight.is_finite() || weight < 1.0 {
            return Err(EngineError::InvalidWeight { weight });
        }
        if observed_at - self.clock.now() > self.bucket.width {
            return Err(EngineError::FutureEvent { observed_at });
        }
        Ok(())
    }

    /// Adds one event to the window containing `observed_at`.
    ///
    /// # Errors
    ///
    /// See [`AggregationStore::validate`].
    pub async fn record(
        &self,
        entity_id: EntityId,
        observed_at: DateTime<Utc>,
        weight: f64,
    ) -> Result<RecordOutcome, EngineError> {
        self.validate(observed_at, weight)?;

        let start = self.bucket.bucket_start(observed_at);
        let key = WindowKey {
            entity_id,
            bucket: self.bucket.bucket_index(observed_at),
        };

        if !self.bucket.is_closed(start + self.bucket.width, self.clock.now()) {
            let cell = self.cell(&self.windows, key, start).await;
            let mut guard = cell.lock().await;
            if !guard.sealed {
                guard.add(weight);
                return Ok(RecordOutcome::Counted(key));
            }
        }

        let cell = self.cell(&self.late, key, start).await;
        cell.lock().await.add(weight);
        tracing::debug!(
            entity_id = %entity_id,
            window_start = %start,
            "aggregation: late arrival routed to late window"
        );
        Ok(RecordOutcome::Late(key))
    }

    async fn cell(&self, map: &RwLock<Cells>, key: WindowKey, start: DateTime<Utc>) -> Cell {
        if let Some(cell) = map
            .read()
            .await
            .get(&key.entity_id)
            .and_then(|buckets| buckets.get(&key.bucket))
        {
            return Arc::clone(cell);
        }

        let mut cells = map.write().await;
        let cell = cells
            .entry(key.entity_id)
            .or_default()
            .entry(key.bucket)
            .or_insert_with(|| {
                Arc::new(Mutex::new(WindowCell {
                    window: AggregationWindow::empty(key.entity_id, start, self.bucket),
                    sealed: false,
                    dirty: false,
                }))
            });
        Arc::clone(cell)
    }

    /// Regular windows of `entity_id` starting at or after the bucket of
    /// `since`, oldest first.
    pub async fn windows_for(
        &self,
        entity_id: EntityId,
        since: DateTime<Utc>,
    ) -> Vec<AggregationWindow> {
        let from = self.bucket.bucket_index(since);
        let cells: Vec<Cell> = self
            .windows
            .read()
            .await
            .get(&entity_id)
            .map(|buckets| buckets.range(from..).map(|(_, c)| Arc::clone(c)).collect())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.window.clone());
        }
        out
    }

    /// Late windows of `entity_id`, oldest first.
    pub async fn late_windows_for(&self, entity_id: EntityId) -> Vec<AggregationWindow> {
        let cells: Vec<Cell> = self
            .late
            .read()
            .await
            .get(&entity_id)
            .map(|buckets| buckets.values().map(Arc::clone).collect())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.window.clone());
        }
        out
    }

    /// Mentions across all retained regular and late windows of `entity_id`.
    pub async fn mention_count_total(&self, entity_id: EntityId) -> u64 {
        let regular: u64 = self
            .windows_for(entity_id, DateTime::<Utc>::MIN_UTC)
            .await
            .iter()
            .map(|w| w.mention_count)
            .sum();
        let late: u64 = self
            .late_windows_for(entity_id)
            .await
            .iter()
            .map(|w| w.mention_count)
            .sum();
        regular + late
    }

    /// Entities with at least one retained regular window.
    pub async fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.windows.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Seals every regular window closed as of `now` and drains the dirty set.
    pub async fn flush(&self, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();

        for cell in all_cells(&self.windows).await {
            let mut guard = cell.lock().await;
            if !guard.sealed && self.bucket.is_closed(guard.window.window_end, now) {
                guard.sealed = true;
                guard.dirty = true;
                report.newly_sealed.push(guard.window.clone());
            }
            if guard.dirty {
                guard.dirty = false;
                report.changed.push(StoredWindow {
                    window: guard.window.clone(),
                    late: false,
                    sealed: guard.sealed,
                });
            }
        }

        for cell in all_cells(&self.late).await {
            let mut guard = cell.lock().await;
            if guard.dirty {
                guard.dirty = false;
                report.changed.push(StoredWindow {
                    window: guard.window.clone(),
                    late: true,
                    sealed: false,
                });
            }
        }

        report
    }

    /// Re-flags windows whose write-through failed so the next flush retries.
    pub async fn mark_dirty(&self, stored: &[StoredWindow]) {
        for s in stored {
            let map = if s.late { &self.late } else { &self.windows };
            let key = WindowKey {
                entity_id: s.window.entity_id,
                bucket: self.bucket.bucket_index(s.window.window_start),
            };
            let cell = map
                .read()
                .await
                .get(&key.entity_id)
                .and_then(|b| b.get(&key.bucket))
                .map(Arc::clone);
            if let Some(cell) = cell {
                cell.lock().await.dirty = true;
            }
        }
    }

    /// Loads persisted windows. Regular windows already closed are sealed.
    pub async fn hydrate(&self, stored: Vec<StoredWindow>) {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let mut late = self.late.write().await;

        for s in stored {
            let bucket = self.bucket.bucket_index(s.window.window_start);
            let sealed = !s.late && (s.sealed || self.bucket.is_closed(s.window.window_end, now));
            let target = if s.late { &mut late } else { &mut windows };
            target.entry(s.window.entity_id).or_default().insert(
                bucket,
                Arc::new(Mutex::new(WindowCell {
                    window: s.window,
                    sealed,
                    dirty: false,
                })),
            );
        }
    }

    /// Drops windows older than the retention horizon. Returns how many were
    /// removed and the oldest retained bucket index.
    pub async fn prune(&self, now: DateTime<Utc>) -> (usize, i64) {
        let retention = i64::try_from(self.retention_windows).unwrap_or(i64::MAX);
        let horizon = self.bucket.bucket_index(now).saturating_sub(retention);

        let mut removed = 0;
        for map in [&self.windows, &self.late] {
            let mut cells = map.write().await;
            for buckets in cells.values_mut() {
                let kept = buckets.split_off(&horizon);
                removed += buckets.len();
                *buckets = kept;
            }
            cells.retain(|_, buckets| !buckets.is_empty());
        }

        if removed > 0 {
            tracing::debug!(removed, horizon, "aggregation: pruned windows past retention");
        }
        (removed, horizon)
    }
}

async fn all_cells(map: &RwLock<Cells>) -> Vec<Cell> {
    map.read()
        .await
        .values()
        .flat_map(|buckets| buckets.values().map(Arc::clone))
        .collect()
}

#[cfg(test)]
#[path = "aggregation_test.rs"]
mod tests;
