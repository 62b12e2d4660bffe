//! Engine wiring: normalizer → aggregation store → scorer → snapshot book →
//! cache, with write-through to the persistence collaborator.
//!
//! Per-event and per-entity failures are logged, counted and skipped; they
//! never fail a whole batch, tick or sweep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use trendpulse_core::{
    AppConfig, BucketSpec, CanonicalEntity, EntityId, EntitySeed, MentionEvent, MentionSink,
    ScoreSnapshot, SinkError,
};

use crate::aggregation::{AggregationStore, RecordOutcome, StoredWindow};
use crate::cache::{CacheBackend, RankingCache};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::normalizer::{NormalizeOutcome, Normalizer, NormalizerConfig, Resolution};
use crate::persistence::Persistence;
use crate::query::{LiveRankingSource, QueryService};
use crate::scorer::{MomentumScorer, ScorerConfig};
use crate::snapshots::SnapshotBook;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub bucket: BucketSpec,
    pub retention_windows: usize,
    pub normalizer: NormalizerConfig,
    pub scorer: ScorerConfig,
    pub cache_ttl: Duration,
    pub cache_page_size: usize,
    pub cache_rebuild_timeout: Duration,
    /// Entities rescored concurrently during a tick or sweep.
    pub rescore_concurrency: usize,
}

impl EngineSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        let bucket = BucketSpec::new(config.bucket_width_secs, config.grace_period_secs);
        Self {
            bucket,
            retention_windows: config.retention_windows,
            normalizer: NormalizerConfig {
                fuzzy_threshold: config.fuzzy_threshold,
                min_confidence: config.min_confidence,
                bucket,
            },
            scorer: ScorerConfig {
                baseline_windows: config.baseline_windows,
                ewma_alpha: config.ewma_alpha,
                zero_baseline_score: config.zero_baseline_score,
            },
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache_page_size: config.cache_page_size,
            cache_rebuild_timeout: Duration::from_millis(config.cache_rebuild_timeout_ms),
            rescore_concurrency: 8,
        }
    }
}

/// What happened to a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Counted,
    Late,
    Duplicate,
    LowConfidence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub counted: usize,
    pub late: usize,
    pub duplicates: usize,
    pub low_confidence: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sealed: usize,
    pub windows_persisted: usize,
    pub rescored: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub entities: usize,
    pub seeded: usize,
    pub windows: usize,
    pub snapshots: usize,
}

pub struct Engine {
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    normalizer: Arc<Normalizer>,
    store: Arc<AggregationStore>,
    scorer: MomentumScorer,
    book: Arc<SnapshotBook>,
    cache: RankingCache,
    query: QueryService,
    persistence: Arc<dyn Persistence>,
    metrics: Arc<EngineMetrics>,
}

impl Engine {
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        persistence: Arc<dyn Persistence>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let normalizer = Arc::new(Normalizer::new(settings.normalizer));
        let store = Arc::new(AggregationStore::new(
            settings.bucket,
            settings.retention_windows,
            Arc::clone(&clock),
        ));
        let scorer = MomentumScorer::new(settings.scorer, settings.bucket);
        let book = Arc::new(SnapshotBook::new());
        let cache = RankingCache::new(
            cache_backend,
            settings.cache_ttl,
            settings.cache_rebuild_timeout,
        );
        let source = LiveRankingSource::new(
            Arc::clone(&normalizer),
            Arc::clone(&book),
            Arc::clone(&store),
            scorer,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );
        let query = QueryService::new(
            Arc::new(source),
            cache.clone(),
            settings.cache_page_size,
            Arc::clone(&metrics),
        );

        Self {
            settings,
            clock,
            normalizer,
            store,
            scorer,
            book,
            cache,
            query,
            persistence,
            metrics,
        }
    }

    /// Restores persisted entities, windows and snapshots, then merges the
    /// seed catalog and writes any catalog changes back.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if any of the initial loads fail.
    pub async fn bootstrap(&self, seeds: &[EntitySeed]) -> Result<BootstrapReport, EngineError> {
        let entities = self.persistence.load_entities().await?;
        let entity_count = entities.len();
        self.normalizer.hydrate(entities).await;
        let seeded = self.normalizer.seed(seeds).await;

        let retention = i32::try_from(self.settings.retention_windows).unwrap_or(i32::MAX);
        let since = self.settings.bucket.bucket_start(self.clock.now())
            - self.settings.bucket.width * retention;
        let windows = self.persistence.load_windows(since).await?;
        let window_count = windows.len();
        self.store.hydrate(windows).await;

        let snapshots = self.persistence.latest_snapshots().await?;
        let snapshot_count = snapshots.len();
        for snapshot in snapshots {
            self.book.publish(snapshot).await;
        }

        self.flush_catalog().await;

        let report = BootstrapReport {
            entities: entity_count,
            seeded,
            windows: window_count,
            snapshots: snapshot_count,
        };
        tracing::info!(
            entities = report.entities,
            seeded = report.seeded,
            windows = report.windows,
            snapshots = report.snapshots,
            "engine: bootstrapped"
        );
        Ok(report)
    }

    /// Normalizes and records one event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWeight`], [`EngineError::FutureEvent`] or
    /// [`EngineError::BlankGuess`] for events that cannot be counted.
    pub async fn ingest_event(&self, event: &MentionEvent) -> Result<EventOutcome, EngineError> {
        self.store
            .validate(event.observed_at, event.engagement_weight)?;

        let resolved = match self.normalizer.normalize(event).await? {
            NormalizeOutcome::Accepted(resolved) => resolved,
            NormalizeOutcome::Duplicate { entity_id } => {
                self.metrics.duplicate();
                tracing::debug!(
                    entity_id = %entity_id,
                    post_id = %event.platform_post_id,
                    "engine: duplicate mention discarded"
                );
                return Ok(EventOutcome::Duplicate);
            }
            NormalizeOutcome::LowConfidence => {
                self.metrics.low_confidence();
                return Ok(EventOutcome::LowConfidence);
            }
        };

        match resolved.resolution {
            Resolution::Created => self.metrics.entity_created(),
            Resolution::Fuzzy { .. } => self.metrics.alias_added(),
            Resolution::Exact => {}
        }

        let outcome = self
            .store
            .record(
                resolved.entity_id,
                event.observed_at,
                event.engagement_weight,
            )
            .await?;
        self.metrics.event_accepted();
        Ok(match outcome {
            RecordOutcome::Counted(_) => EventOutcome::Counted,
            RecordOutcome::Late(_) => {
                self.metrics.late_arrival();
                EventOutcome::Late
            }
        })
    }

    /// Ingests a batch. Events that fail validation are logged and skipped.
    pub async fn ingest(&self, events: Vec<MentionEvent>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for event in &events {
            match self.ingest_event(event).await {
                Ok(EventOutcome::Counted) => summary.counted += 1,
                Ok(EventOutcome::Late) => summary.late += 1,
                Ok(EventOutcome::Duplicate) => summary.duplicates += 1,
                Ok(EventOutcome::LowConfidence) => summary.low_confidence += 1,
                Err(e) => {
                    summary.rejected += 1;
                    self.metrics.event_rejected();
                    tracing::warn!(
                        post_id = %event.platform_post_id,
                        error = %e,
                        "engine: event rejected"
                    );
                }
            }
        }

        self.flush_catalog().await;
        tracing::debug!(
            counted = summary.counted,
            late = summary.late,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            "engine: batch ingested"
        );
        summary
    }

    /// Seals closed windows, writes changed windows through, rescores every
    /// entity whose latest window just closed and prunes expired state.
    pub async fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let flush = self.store.flush(now).await;

        let mut latest: BTreeMap<EntityId, DateTime<Utc>> = BTreeMap::new();
        for window in &flush.newly_sealed {
            let start = latest.entry(window.entity_id).or_insert(window.window_start);
            *start = (*start).max(window.window_start);
        }

        let windows_persisted = self.persist_windows(flush.changed).await;

        let rescored = stream::iter(latest)
            .map(|(entity_id, as_of)| self.rescore_logged(entity_id, as_of))
            .buffer_unordered(self.settings.rescore_concurrency.max(1))
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;

        let (pruned, horizon) = self.store.prune(now).await;
        self.normalizer.prune_seen(horizon).await;
        self.flush_catalog().await;

        let report = TickReport {
            sealed: flush.newly_sealed.len(),
            windows_persisted,
            rescored,
            pruned,
        };
        if report.sealed > 0 || report.pruned > 0 {
            tracing::info!(
                sealed = report.sealed,
                windows_persisted = report.windows_persisted,
                rescored = report.rescored,
                pruned = report.pruned,
                "engine: tick"
            );
        }
        report
    }

    /// Rescores every live entity as of the latest closed bucket so scores
    /// decay once mentions stop. Returns how many snapshots were emitted.
    pub async fn sweep(&self) -> usize {
        let as_of = self.scorer.sweep_as_of(self.clock.now());
        let ids: Vec<EntityId> = self
            .normalizer
            .entities()
            .await
            .into_iter()
            .filter(|e| !e.is_archived())
            .map(|e| e.entity_id)
            .collect();
        let total = ids.len();

        let rescored = stream::iter(ids)
            .map(|entity_id| self.rescore_logged(entity_id, as_of))
            .buffer_unordered(self.settings.rescore_concurrency.max(1))
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;

        tracing::info!(rescored, entities = total, as_of = %as_of, "engine: decay sweep");
        rescored
    }

    /// Scores `entity_id` as of the bucket containing `as_of` and publishes
    /// the snapshot. Archived entities are skipped and yield `None`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownEntity`] if the entity is not in the catalog.
    /// - [`EngineError::Inconsistent`] if its windows fail the scorer checks.
    pub async fn rescore(
        &self,
        entity_id: EntityId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ScoreSnapshot>, EngineError> {
        let entity = self
            .normalizer
            .entity(entity_id)
            .await
            .ok_or(EngineError::UnknownEntity(entity_id))?;
        if entity.is_archived() {
            return Ok(None);
        }

        let since = as_of - self.scoring_span();
        let windows = self.store.windows_for(entity_id, since).await;
        let total = self.store.mention_count_total(entity_id).await;
        let snapshot = self
            .scorer
            .score(entity_id, &windows, total, as_of, self.clock.now())?;

        self.book.publish(snapshot.clone()).await;
        self.metrics.snapshot_emitted();

        if let Err(e) = self.cache.invalidate_entity(entity_id, entity.kind).await {
            tracing::warn!(entity_id = %entity_id, error = %e, "engine: cache invalidation failed");
        }
        if let Err(e) = self.persistence.save_snapshot(&snapshot).await {
            self.metrics.persistence_failure();
            tracing::warn!(entity_id = %entity_id, error = %e, "engine: snapshot write-through failed");
        }

        Ok(Some(snapshot))
    }

    async fn rescore_logged(&self, entity_id: EntityId, as_of: DateTime<Utc>) -> bool {
        match self.rescore(entity_id, as_of).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e @ EngineError::Inconsistent { .. }) => {
                self.metrics.inconsistency();
                tracing::error!(entity_id = %entity_id, error = %e, "engine: entity update skipped");
                false
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity_id, error = %e, "engine: rescore failed");
                false
            }
        }
    }

    /// Soft-archives an entity and drops it from cached rankings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownEntity`] if the id is not in the catalog.
    pub async fn archive(&self, entity_id: EntityId) -> Result<CanonicalEntity, EngineError> {
        let entity = self.normalizer.archive(entity_id, self.clock.now()).await?;
        if let Err(e) = self.cache.invalidate_entity(entity_id, entity.kind).await {
            tracing::warn!(entity_id = %entity_id, error = %e, "engine: cache invalidation failed");
        }
        self.flush_catalog().await;
        tracing::info!(entity_id = %entity_id, "engine: entity archived");
        Ok(entity)
    }

    /// Writes dirty catalog entries through. Failures are re-queued for the
    /// next call. Returns how many entities were written.
    pub async fn flush_catalog(&self) -> usize {
        let dirty = self.normalizer.take_dirty().await;
        let mut written = 0;
        let mut failed = Vec::new();
        for entity in &dirty {
            match self.persistence.upsert_entity(entity).await {
                Ok(()) => written += 1,
                Err(e) => {
                    self.metrics.persistence_failure();
                    tracing::warn!(
                        entity_id = %entity.entity_id,
                        error = %e,
                        "engine: entity write-through failed, will retry"
                    );
                    failed.push(entity.entity_id);
                }
            }
        }
        if !failed.is_empty() {
            self.normalizer.mark_dirty(failed).await;
        }
        written
    }

    async fn persist_windows(&self, changed: Vec<StoredWindow>) -> usize {
        let mut written = 0;
        let mut failed = Vec::new();
        for window in changed {
            match self.persistence.save_window(&window).await {
                Ok(()) => written += 1,
                Err(e) => {
                    self.metrics.persistence_failure();
                    tracing::warn!(
                        entity_id = %window.window.entity_id,
                        window_start = %window.window.window_start,
                        error = %e,
                        "engine: window write-through failed, will retry"
                    );
                    failed.push(window);
                }
            }
        }
        if !failed.is_empty() {
            self.store.mark_dirty(&failed).await;
        }
        written
    }

    #[must_use]
    pub fn query(&self) -> &QueryService {
        &self.query
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotBook {
        &self.book
    }

    /// History a rescore reads: the baseline buckets plus the scored one.
    fn scoring_span(&self) -> TimeDelta {
        let span = i32::try_from(self.scorer.config().baseline_windows + 1).unwrap_or(i32::MAX);
        self.settings.bucket.width * span
    }
}

#[async_trait]
impl MentionSink for Engine {
    async fn accept(&self, events: Vec<MentionEvent>) -> Result<usize, SinkError> {
        let summary = self.ingest(events).await;
        Ok(summary.counted + summary.late)
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
