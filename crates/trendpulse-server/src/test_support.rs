//! Engine fixtures shared by the route and scheduler tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use trendpulse_core::{parse_catalog, BucketSpec, MentionEvent};
use trendpulse_engine::{
    Engine, EngineSettings, ManualClock, MemoryCacheBackend, MemoryPersistence, NormalizerConfig,
    ScorerConfig,
};

const CATALOG: &str = r"
entities:
  - name: Wide Leg Denim
    kind: trend
    aliases: [wide-leg-denim]
    description: Relaxed, full-length denim cuts
  - name: Ballet Flats
    kind: trend
  - name: Canadian Tuxedo
    kind: style
  - name: Brandy Melville
    kind: brand
";

pub(crate) struct TestEngine {
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<MemoryCacheBackend>,
}

pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
}

fn settings() -> EngineSettings {
    let bucket = BucketSpec::new(3_600, 300);
    EngineSettings {
        bucket,
        retention_windows: 48,
        normalizer: NormalizerConfig {
            fuzzy_threshold: 0.85,
            min_confidence: 0.0,
            bucket,
        },
        scorer: ScorerConfig {
            baseline_windows: 6,
            ewma_alpha: 0.6,
            zero_baseline_score: 0.5,
        },
        cache_ttl: Duration::from_secs(60),
        cache_page_size: 2,
        cache_rebuild_timeout: Duration::from_secs(5),
        rescore_concurrency: 2,
    }
}

pub(crate) async fn test_engine(now: DateTime<Utc>) -> TestEngine {
    let clock = Arc::new(ManualClock::new(now));
    let cache = Arc::new(MemoryCacheBackend::new(100));
    let engine = Engine::new(
        settings(),
        clock.clone(),
        Arc::new(MemoryPersistence::new()),
        cache.clone(),
    );
    let catalog = parse_catalog(CATALOG).expect("test catalog parses");
    engine
        .bootstrap(&catalog.entities)
        .await
        .expect("bootstrap succeeds");
    TestEngine {
        engine: Arc::new(engine),
        clock,
        cache,
    }
}

/// `count` mentions of `guess`, one per minute from `start`.
pub(crate) fn mentions(guess: &str, start: DateTime<Utc>, count: u32) -> Vec<MentionEvent> {
    (0..count)
        .map(|i| MentionEvent {
            raw_entity_guess: guess.to_string(),
            platform_post_id: format!("{guess}-{}-{i}", start.timestamp()),
            observed_at: start + chrono::Duration::minutes(i64::from(i)),
            engagement_weight: 1.0,
            kind_hint: None,
            confidence: None,
        })
        .collect()
}
