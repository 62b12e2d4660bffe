//! Query service: ranked entity lists and single-entity lookups, served
//! through the [`RankingCache`].
//!
//! Every non-empty page successfully served is remembered in process memory,
//! as is every entity that exists. When the cache or its rebuild fails, that
//! copy is returned flagged `stale`; only when no copy exists does the query
//! fail with [`EngineError::QueryUnavailable`]. Pages past the end of the
//! latest ranking are forgotten, so memory tracks the catalog rather than
//! the offsets clients ask for.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use trendpulse_core::{CanonicalEntity, EntityId, EntityKind, ScoreSnapshot};

use crate::aggregation::AggregationStore;
use crate::cache::{entity_key, list_key, CacheScope, RankingCache};
use crate::clock::Clock;
use crate::error::{CacheError, EngineError};
use crate::metrics::EngineMetrics;
use crate::normalizer::Normalizer;
use crate::scorer::MomentumScorer;
use crate::snapshots::SnapshotBook;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Momentum,
    Mentions,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Momentum => "momentum",
            SortOrder::Mentions => "mentions",
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "momentum" | "score" => Ok(SortOrder::Momentum),
            "mentions" | "mention_count" => Ok(SortOrder::Mentions),
            other => Err(format!("unknown sort order '{other}'")),
        }
    }
}

/// A snapshot joined with the catalog fields the API needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub snapshot: ScoreSnapshot,
    pub display_name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
}

impl RankedEntity {
    #[must_use]
    pub fn new(entity: &CanonicalEntity, snapshot: ScoreSnapshot) -> Self {
        Self {
            snapshot,
            display_name: entity.display_name.clone(),
            kind: entity.kind,
            description: entity.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedPage {
    pub items: Vec<RankedEntity>,
    /// Served from the last good copy after a cache failure.
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityView {
    pub item: Option<RankedEntity>,
    pub stale: bool,
}

/// Orders by the tie-break chain of `sort`; `entity_id` ascending is always
/// the last key.
pub fn sort_ranked(items: &mut [RankedEntity], sort: SortOrder) {
    let by_score = |a: &RankedEntity, b: &RankedEntity| {
        b.snapshot
            .momentum_score
            .total_cmp(&a.snapshot.momentum_score)
    };
    let by_mentions = |a: &RankedEntity, b: &RankedEntity| {
        b.snapshot
            .mention_count_total
            .cmp(&a.snapshot.mention_count_total)
    };
    let by_id = |a: &RankedEntity, b: &RankedEntity| a.snapshot.entity_id.cmp(&b.snapshot.entity_id);

    items.sort_by(|a, b| {
        let primary = match sort {
            SortOrder::Momentum => by_score(a, b).then_with(|| by_mentions(a, b)),
            SortOrder::Mentions => by_mentions(a, b).then_with(|| by_score(a, b)),
        };
        primary.then_with(|| by_id(a, b))
    });
}

/// Backing data for cache rebuilds.
#[async_trait]
pub trait RankingSource: Send + Sync {
    /// Every non-archived entity of `kind`, sorted by `sort`.
    async fn ranked(
        &self,
        kind: EntityKind,
        sort: SortOrder,
    ) -> Result<Vec<RankedEntity>, EngineError>;

    async fn entity(&self, entity_id: EntityId) -> Result<Option<RankedEntity>, EngineError>;
}

/// Ranks straight from the engine's in-memory state. Entities not yet scored
/// get a provisional score over their current windows.
pub struct LiveRankingSource {
    normalizer: Arc<Normalizer>,
    book: Arc<SnapshotBook>,
    store: Arc<AggregationStore>,
    scorer: MomentumScorer,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
}

impl LiveRankingSource {
    #[must_use]
    pub fn new(
        normalizer: Arc<Normalizer>,
        book: Arc<SnapshotBook>,
        store: Arc<AggregationStore>,
        scorer: MomentumScorer,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            normalizer,
            book,
            store,
            scorer,
            clock,
            metrics,
        }
    }

    async fn snapshot_for(&self, entity_id: EntityId) -> Option<ScoreSnapshot> {
        if let Some(snapshot) = self.book.get(entity_id).await {
            return Some(snapshot);
        }

        let now = self.clock.now();
        let windows = self.store.windows_for(entity_id, DateTime::<Utc>::MIN_UTC).await;
        let total = self.store.mention_count_total(entity_id).await;
        match self.scorer.score(entity_id, &windows, total, now, now) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.metrics.inconsistency();
                tracing::error!(entity_id = %entity_id, error = %e, "query: provisional score skipped");
                None
            }
        }
    }
}

#[async_trait]
impl RankingSource for LiveRankingSource {
    async fn ranked(
        &self,
        kind: EntityKind,
        sort: SortOrder,
    ) -> Result<Vec<RankedEntity>, EngineError> {
        let entities: Vec<CanonicalEntity> = self
            .normalizer
            .entities()
            .await
            .into_iter()
            .filter(|e| e.kind == kind && !e.is_archived())
            .collect();

        let mut items = Vec::with_capacity(entities.len());
        for entity in &entities {
            if let Some(snapshot) = self.snapshot_for(entity.entity_id).await {
                items.push(RankedEntity::new(entity, snapshot));
            }
        }
        sort_ranked(&mut items, sort);
        Ok(items)
    }

    async fn entity(&self, entity_id: EntityId) -> Result<Option<RankedEntity>, EngineError> {
        let Some(entity) = self.normalizer.entity(entity_id).await else {
            return Ok(None);
        };
        Ok(self
            .snapshot_for(entity_id)
            .await
            .map(|snapshot| RankedEntity::new(&entity, snapshot)))
    }
}

type PageKey = (EntityKind, SortOrder, usize);

pub struct QueryService {
    source: Arc<dyn RankingSource>,
    cache: RankingCache,
    page_size: usize,
    metrics: Arc<EngineMetrics>,
    last_pages: Mutex<HashMap<PageKey, Vec<RankedEntity>>>,
    last_entities: Mutex<HashMap<EntityId, RankedEntity>>,
}

impl QueryService {
    #[must_use]
    pub fn new(
        source: Arc<dyn RankingSource>,
        cache: RankingCache,
        page_size: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            source,
            cache,
            page_size: page_size.max(1),
            metrics,
            last_pages: Mutex::new(HashMap::new()),
            last_entities: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &RankingCache {
        &self.cache
    }

    /// Latest snapshots of `kind` in momentum order.
    ///
    /// # Errors
    ///
    /// See [`QueryService::get_ranked_entities`].
    pub async fn get_ranked(
        &self,
        kind: EntityKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScoreSnapshot>, EngineError> {
        let page = self
            .get_ranked_entities(kind, SortOrder::Momentum, limit, offset)
            .await?;
        Ok(page.items.into_iter().map(|r| r.snapshot).collect())
    }

    /// Ranked entities of `kind` in `sort` order, `limit` items from `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::QueryUnavailable`] if the first needed cache
    /// page can neither be read or rebuilt nor served from a previous
    /// response. A later page failing that way truncates the result, which
    /// is then flagged `stale`.
    pub async fn get_ranked_entities(
        &self,
        kind: EntityKind,
        sort: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<RankedPage, EngineError> {
        if limit == 0 {
            return Ok(RankedPage::default());
        }

        let first_page = offset / self.page_size;
        let last_page = (offset + limit - 1) / self.page_size;

        let mut collected = Vec::new();
        let mut stale = false;
        for page in first_page..=last_page {
            let key = list_key(kind, sort, page);
            let items = match self.fetch_page(key.clone(), kind, sort, page).await {
                Ok(items) => {
                    self.remember_page((kind, sort, page), &items).await;
                    items
                }
                Err(e) => {
                    stale = true;
                    match self.fallback_page(&key, (kind, sort, page), &e).await {
                        Ok(items) => items,
                        Err(_) if !collected.is_empty() => {
                            tracing::warn!(key = %key, "query: returning pages collected before failure");
                            break;
                        }
                        Err(unavailable) => return Err(unavailable),
                    }
                }
            };
            let short = items.len() < self.page_size;
            collected.extend(items);
            if short {
                break;
            }
        }

        let skip = offset - first_page * self.page_size;
        Ok(RankedPage {
            items: collected.into_iter().skip(skip).take(limit).collect(),
            stale,
        })
    }

    async fn fetch_page(
        &self,
        key: String,
        kind: EntityKind,
        sort: SortOrder,
        page: usize,
    ) -> Result<Vec<RankedEntity>, CacheError> {
        let source = Arc::clone(&self.source);
        let page_size = self.page_size;
        let rebuild_key = key.clone();
        self.cache
            .get_or_rebuild(key, CacheScope::Kind(kind), move || async move {
                let ranked =
                    source
                        .ranked(kind, sort)
                        .await
                        .map_err(|e| CacheError::RebuildFailed {
                            key: rebuild_key,
                            reason: e.to_string(),
                        })?;
                Ok(ranked
                    .into_iter()
                    .skip(page * page_size)
                    .take(page_size)
                    .collect::<Vec<_>>())
            })
            .await
    }

    /// Keeps `items` as the fallback for `page`. A short page marks the end
    /// of the ranking, so every later page of the same list is dropped; an
    /// empty page past the first is not kept at all.
    async fn remember_page(&self, (kind, sort, page): PageKey, items: &[RankedEntity]) {
        let mut last_pages = self.last_pages.lock().await;
        let end = if items.is_empty() && page > 0 {
            page
        } else {
            last_pages.insert((kind, sort, page), items.to_vec());
            if items.len() == self.page_size {
                return;
            }
            page + 1
        };
        last_pages.retain(|&(k, s, p), _| k != kind || s != sort || p < end);
    }

    async fn fallback_page(
        &self,
        key: &str,
        page: PageKey,
        error: &CacheError,
    ) -> Result<Vec<RankedEntity>, EngineError> {
        if let Some(items) = self.last_pages.lock().await.get(&page).cloned() {
            self.metrics.stale_query();
            tracing::warn!(key, error = %error, "query: serving last known page");
            return Ok(items);
        }
        tracing::error!(key, error = %error, "query: no cached copy to fall back to");
        Err(EngineError::QueryUnavailable(error.to_string()))
    }

    /// Latest snapshot of a single entity, archived ones included.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::QueryUnavailable`] under the same conditions as
    /// [`QueryService::get_ranked_entities`].
    pub async fn get_entity(&self, entity_id: EntityId) -> Result<EntityView, EngineError> {
        let source = Arc::clone(&self.source);
        let key = entity_key(entity_id);
        let rebuild_key = key.clone();
        let result = self
            .cache
            .get_or_rebuild(key.clone(), CacheScope::Entity(entity_id), move || async move {
                source
                    .entity(entity_id)
                    .await
                    .map_err(|e| CacheError::RebuildFailed {
                        key: rebuild_key,
                        reason: e.to_string(),
                    })
            })
            .await;

        match result {
            Ok(item) => {
                let mut last_entities = self.last_entities.lock().await;
                match &item {
                    Some(found) => last_entities.insert(entity_id, found.clone()),
                    None => last_entities.remove(&entity_id),
                };
                Ok(EntityView { item, stale: false })
            }
            Err(e) => {
                if let Some(item) = self.last_entities.lock().await.get(&entity_id).cloned() {
                    self.metrics.stale_query();
                    tracing::warn!(key = %key, error = %e, "query: serving last known entity");
                    return Ok(EntityView {
                        item: Some(item),
                        stale: true,
                    });
                }
                tracing::error!(key = %key, error = %e, "query: no cached copy to fall back to");
                Err(EngineError::QueryUnavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;
