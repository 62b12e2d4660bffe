use std::sync::atomic::AtomicUsize;

use tokio::sync::Notify;

use super::*;

const TTL: Duration = Duration::from_secs(60);

fn cache_with(backend: Arc<MemoryCacheBackend>, rebuild_timeout: Duration) -> RankingCache {
    RankingCache::new(backend, TTL, rebuild_timeout)
}

fn trend_scope() -> CacheScope {
    CacheScope::Kind(EntityKind::Trend)
}

fn page_key() -> String {
    list_key(EntityKind::Trend, SortOrder::Momentum, 0)
}

#[test]
fn key_formats() {
    assert_eq!(page_key(), "trend:momentum:0");
    assert_eq!(list_key(EntityKind::Brand, SortOrder::Mentions, 3), "brand:mentions:3");
    assert_eq!(entity_key(EntityId(42)), "42");
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_rebuild() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(backend, Duration::from_secs(5));
    let builds = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        let builds = Arc::clone(&builds);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_rebuild(page_key(), trend_scope(), move || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(vec![3_i64, 1, 2])
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), vec![3, 1, 2]);
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.rebuild_count(), 1);
}

#[tokio::test]
async fn hit_skips_rebuild_until_invalidated() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_secs(5));

    let first: String = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok("v1".to_string()) })
        .await
        .unwrap();
    let second: String = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok("v2".to_string()) })
        .await
        .unwrap();
    assert_eq!((first.as_str(), second.as_str()), ("v1", "v1"));
    assert_eq!(cache.rebuild_count(), 1);

    cache
        .invalidate_entity(EntityId(9), EntityKind::Trend)
        .await
        .unwrap();
    assert!(backend.is_empty().await);

    let third: String = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok("v3".to_string()) })
        .await
        .unwrap();
    assert_eq!(third, "v3");
    assert_eq!(cache.rebuild_count(), 2);
}

#[tokio::test]
async fn invalidating_one_kind_keeps_other_kinds() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_secs(5));
    let brand_key = list_key(EntityKind::Brand, SortOrder::Momentum, 0);

    let _: u32 = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok(1) })
        .await
        .unwrap();
    let _: u32 = cache
        .get_or_rebuild(
            brand_key.clone(),
            CacheScope::Kind(EntityKind::Brand),
            || async { Ok(2) },
        )
        .await
        .unwrap();

    cache
        .invalidate_entity(EntityId(1), EntityKind::Trend)
        .await
        .unwrap();

    assert_eq!(backend.len().await, 1);
    assert!(backend.get(&brand_key).await.unwrap().is_some());
}

#[tokio::test]
async fn rebuild_racing_an_invalidation_is_not_stored() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_secs(5));
    let release = Arc::new(Notify::new());

    let waiter = {
        let cache = cache.clone();
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            cache
                .get_or_rebuild(page_key(), trend_scope(), move || async move {
                    release.notified().await;
                    Ok("before invalidation".to_string())
                })
                .await
        })
    };

    while cache.rebuild_count() == 0 {
        tokio::task::yield_now().await;
    }
    cache
        .invalidate_entity(EntityId(4), EntityKind::Trend)
        .await
        .unwrap();
    release.notify_one();

    assert_eq!(waiter.await.unwrap().unwrap(), "before invalidation");
    assert!(backend.get(&page_key()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_rebuild_times_out_but_still_populates() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(backend, Duration::from_millis(100));

    let result: Result<String, CacheError> = cache
        .get_or_rebuild(page_key(), trend_scope(), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("eventually".to_string())
        })
        .await;
    assert!(matches!(result, Err(CacheError::RebuildTimeout { .. })));

    tokio::time::sleep(Duration::from_millis(600)).await;

    let cached: String = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok("again".to_string()) })
        .await
        .unwrap();
    assert_eq!(cached, "eventually");
    assert_eq!(cache.rebuild_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_rebuild_is_abandoned_and_the_key_rebuilt() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_millis(100));

    let result: Result<String, CacheError> = cache
        .get_or_rebuild(page_key(), trend_scope(), || {
            std::future::pending::<Result<String, CacheError>>()
        })
        .await;
    assert!(matches!(result, Err(CacheError::RebuildTimeout { .. })));
    assert!(cache.inner.in_flight.lock().await.contains_key(&page_key()));

    tokio::time::sleep(Duration::from_millis(100) * REBUILD_TASK_TIMEOUT_FACTOR).await;
    assert!(cache.inner.in_flight.lock().await.is_empty());

    let fresh: String = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok("fresh".to_string()) })
        .await
        .unwrap();
    assert_eq!(fresh, "fresh");
    assert_eq!(cache.rebuild_count(), 2);
    assert!(backend.get(&page_key()).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_rebuild_reaches_every_waiter_and_is_not_cached() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_secs(5));

    let result: Result<u8, CacheError> = cache
        .get_or_rebuild(page_key(), trend_scope(), || async {
            Err(CacheError::RebuildFailed {
                key: "trend:momentum:0".to_string(),
                reason: "source offline".to_string(),
            })
        })
        .await;
    assert!(matches!(result, Err(CacheError::RebuildFailed { .. })));
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn backend_outage_surfaces_as_backend_error() {
    let backend = Arc::new(MemoryCacheBackend::new(100));
    let cache = cache_with(Arc::clone(&backend), Duration::from_secs(5));
    backend.set_available(false);

    let result: Result<u8, CacheError> = cache
        .get_or_rebuild(page_key(), trend_scope(), || async { Ok(1) })
        .await;
    assert!(matches!(result, Err(CacheError::Backend(_))));
    assert_eq!(cache.rebuild_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn memory_backend_expires_and_evicts() {
    let backend = MemoryCacheBackend::new(2);
    backend.set("a", "1".into(), Duration::from_secs(10)).await.unwrap();
    backend.set("b", "2".into(), Duration::from_secs(20)).await.unwrap();
    backend.set("c", "3".into(), Duration::from_secs(30)).await.unwrap();

    assert!(backend.get("a").await.unwrap().is_none(), "closest to expiry evicted");
    assert_eq!(backend.len().await, 2);

    tokio::time::advance(Duration::from_secs(21)).await;
    assert!(backend.get("b").await.unwrap().is_none());
    assert_eq!(backend.get("c").await.unwrap().as_deref(), Some("3"));
}
