//! Trend aggregation and scoring engine.
//!
//! Mention events are resolved to canonical entities, counted into fixed
//! time buckets, scored for momentum and served as cached rankings.

pub mod aggregation;
pub mod cache;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod persistence;
pub mod pipeline;
pub mod query;
pub mod scorer;
pub mod similarity;
pub mod snapshots;

pub use aggregation::{AggregationStore, FlushReport, RecordOutcome, StoredWindow, WindowKey};
pub use cache::{CacheBackend, CacheScope, MemoryCacheBackend, RankingCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, EngineError};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use normalizer::{NormalizeOutcome, Normalizer, NormalizerConfig, Resolution, Resolved};
pub use persistence::{MemoryPersistence, Persistence, PersistenceError};
pub use pipeline::{
    BootstrapReport, Engine, EngineSettings, EventOutcome, IngestSummary, TickReport,
};
pub use query::{
    sort_ranked, EntityView, LiveRankingSource, QueryService, RankedEntity, RankedPage,
    RankingSource, SortOrder,
};
pub use scorer::{MomentumScorer, ScorerConfig};
pub use snapshots::SnapshotBook;
