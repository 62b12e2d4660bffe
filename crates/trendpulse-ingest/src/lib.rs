//! Upstream mention ingestion.
//!
//! Pulls pages of mention events from the social-video platform through a
//! shared token-bucket [`RateLimiter`], retries transient failures with capped
//! exponential backoff, validates raw payloads into [`MentionEvent`]s and hands
//! each page to a [`MentionSink`], checkpointing the cursor after every page
//! the sink accepted.
//!
//! [`MentionEvent`]: trendpulse_core::MentionEvent
//! [`MentionSink`]: trendpulse_core::MentionSink

pub mod checkpoint;
pub mod client;
pub mod error;
pub mod payload;
pub mod rate_limit;
pub mod retry;
pub mod runner;
pub mod source;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use client::HttpEventSource;
pub use error::IngestError;
pub use rate_limit::{RateBudget, RateLimiter};
pub use retry::BackoffPolicy;
pub use runner::{run_ingestion, IngestReport, IngestionClient};
pub use source::{Cursor, EventSource, Page};
