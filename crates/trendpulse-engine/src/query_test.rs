use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::TimeZone;

use super::*;
use crate::cache::{CacheBackend, MemoryCacheBackend};

fn ranked(id: i64, score: f64, mentions: u64) -> RankedEntity {
    RankedEntity {
        snapshot: ScoreSnapshot {
            entity_id: EntityId(id),
            momentum_score: score,
            mention_count_total: mentions,
            computed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            growth_rate: 0.0,
        },
        display_name: format!("entity {id}"),
        kind: EntityKind::Trend,
        description: None,
    }
}

fn ids(items: &[RankedEntity]) -> Vec<i64> {
    items.iter().map(|r| r.snapshot.entity_id.0).collect()
}

/// Fixed ranking; counts calls so tests can see cache hits.
struct FixedSource {
    items: Vec<RankedEntity>,
    calls: AtomicUsize,
}

impl FixedSource {
    fn new(items: Vec<RankedEntity>) -> Arc<Self> {
        Arc::new(Self {
            items,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RankingSource for FixedSource {
    async fn ranked(
        &self,
        kind: EntityKind,
        sort: SortOrder,
    ) -> Result<Vec<RankedEntity>, EngineError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        sort_ranked(&mut items, sort);
        Ok(items)
    }

    async fn entity(&self, entity_id: EntityId) -> Result<Option<RankedEntity>, EngineError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self
            .items
            .iter()
            .find(|r| r.snapshot.entity_id == entity_id)
            .cloned())
    }
}

fn service(
    source: Arc<FixedSource>,
    page_size: usize,
) -> (QueryService, Arc<MemoryCacheBackend>, Arc<EngineMetrics>) {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = RankingCache::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let metrics = Arc::new(EngineMetrics::new());
    (
        QueryService::new(source, cache, page_size, Arc::clone(&metrics)),
        backend,
        metrics,
    )
}

#[test]
fn momentum_order_breaks_ties_by_mentions_then_id() {
    let mut items = vec![
        ranked(4, 0.5, 10),
        ranked(2, 0.9, 1),
        ranked(3, 0.5, 10),
        ranked(1, 0.5, 30),
    ];
    sort_ranked(&mut items, SortOrder::Momentum);
    assert_eq!(ids(&items), vec![2, 1, 3, 4]);
}

#[test]
fn mentions_order_breaks_ties_by_score_then_id() {
    let mut items = vec![
        ranked(4, 0.2, 10),
        ranked(2, 0.9, 1),
        ranked(3, 0.7, 10),
        ranked(1, 0.7, 10),
    ];
    sort_ranked(&mut items, SortOrder::Mentions);
    assert_eq!(ids(&items), vec![1, 3, 4, 2]);
}

#[test]
fn sort_order_parses_query_values() {
    assert_eq!("momentum".parse::<SortOrder>().unwrap(), SortOrder::Momentum);
    assert_eq!(" Mentions".parse::<SortOrder>().unwrap(), SortOrder::Mentions);
    assert!("alphabetical".parse::<SortOrder>().is_err());
}

#[tokio::test]
async fn pagination_spans_cache_pages() {
    let source = FixedSource::new((1..=7).map(|id| ranked(id, 0.1 * id as f64, 1)).collect());
    let (service, _backend, _metrics) = service(source, 3);

    let page = service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 4, 2)
        .await
        .unwrap();
    assert_eq!(ids(&page.items), vec![5, 4, 3, 2]);
    assert!(!page.stale);

    let tail = service.get_ranked(EntityKind::Trend, 10, 5).await.unwrap();
    assert_eq!(
        tail.iter().map(|s| s.entity_id.0).collect::<Vec<_>>(),
        vec![2, 1]
    );

    assert!(service
        .get_ranked(EntityKind::Trend, 0, 0)
        .await
        .unwrap()
        .is_empty());
    assert!(service
        .get_ranked(EntityKind::Brand, 5, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let source = FixedSource::new(vec![ranked(1, 0.4, 3), ranked(2, 0.6, 3)]);
    let (service, _backend, _metrics) = service(Arc::clone(&source), 50);

    for _ in 0..5 {
        service.get_ranked(EntityKind::Trend, 10, 0).await.unwrap();
    }
    assert_eq!(source.calls.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(service.cache().rebuild_count(), 1);
}

#[tokio::test]
async fn cache_outage_serves_last_known_page_as_stale() {
    let source = FixedSource::new(vec![ranked(1, 0.4, 3), ranked(2, 0.6, 3)]);
    let (service, backend, metrics) = service(source, 50);

    let fresh = service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 10, 0)
        .await
        .unwrap();
    backend.set_available(false);

    let stale = service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 10, 0)
        .await
        .unwrap();
    assert!(stale.stale);
    assert_eq!(stale.items, fresh.items);
    assert_eq!(metrics.snapshot().stale_queries_served, 1);
}

#[tokio::test]
async fn cache_outage_without_history_is_unavailable() {
    let source = FixedSource::new(vec![ranked(1, 0.4, 3)]);
    let (service, backend, _metrics) = service(source, 50);
    backend.set_available(false);

    assert!(matches!(
        service.get_ranked(EntityKind::Trend, 10, 0).await,
        Err(EngineError::QueryUnavailable(_))
    ));
    assert!(matches!(
        service.get_entity(EntityId(1)).await,
        Err(EngineError::QueryUnavailable(_))
    ));
}

#[tokio::test]
async fn entity_lookup_uses_entity_key_and_falls_back() {
    let source = FixedSource::new(vec![ranked(1, 0.4, 3)]);
    let (service, backend, _metrics) = service(source, 50);

    let found = service.get_entity(EntityId(1)).await.unwrap();
    assert_eq!(found.item.unwrap().snapshot.entity_id, EntityId(1));
    assert!(backend.get("1").await.unwrap().is_some());

    assert!(service
        .get_entity(EntityId(99))
        .await
        .unwrap()
        .item
        .is_none());

    backend.set_available(false);
    let stale = service.get_entity(EntityId(1)).await.unwrap();
    assert!(stale.stale);
    assert!(stale.item.is_some());
}

#[tokio::test]
async fn outage_mid_request_returns_pages_already_collected() {
    let source = FixedSource::new((1..=5).map(|id| ranked(id, 0.1 * id as f64, 1)).collect());
    let (service, backend, _metrics) = service(source, 2);

    service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 2, 0)
        .await
        .unwrap();
    backend.set_available(false);

    let page = service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 4, 0)
        .await
        .unwrap();
    assert!(page.stale);
    assert_eq!(ids(&page.items), vec![5, 4]);

    assert!(matches!(
        service
            .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 2, 2)
            .await,
        Err(EngineError::QueryUnavailable(_))
    ));
}

#[tokio::test]
async fn fallback_memory_is_bounded_by_the_ranking() {
    let source = FixedSource::new((1..=5).map(|id| ranked(id, 0.1 * id as f64, 1)).collect());
    let (service, _backend, _metrics) = service(source, 2);

    for offset in 0..500 {
        service
            .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 2, offset)
            .await
            .unwrap();
    }
    for id in 1..=500 {
        service.get_entity(EntityId(id)).await.unwrap();
    }

    // Five entities at two per page: pages 0, 1 and 2.
    assert_eq!(service.last_pages.lock().await.len(), 3);
    assert_eq!(service.last_entities.lock().await.len(), 5);
}

#[tokio::test]
async fn shrinking_ranking_forgets_trailing_pages() {
    let source = FixedSource::new((1..=5).map(|id| ranked(id, 0.1 * id as f64, 1)).collect());
    let (service, _backend, _metrics) = service(source, 2);

    service
        .get_ranked_entities(EntityKind::Trend, SortOrder::Momentum, 6, 0)
        .await
        .unwrap();
    assert_eq!(service.last_pages.lock().await.len(), 3);

    service
        .remember_page((EntityKind::Trend, SortOrder::Momentum, 0), &[ranked(5, 0.5, 1)])
        .await;
    let remembered: Vec<PageKey> = service.last_pages.lock().await.keys().copied().collect();
    assert_eq!(remembered, vec![(EntityKind::Trend, SortOrder::Momentum, 0)]);
}
