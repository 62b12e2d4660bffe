use thiserror::Error;
use trendpulse_core::SinkError;

use crate::source::Cursor;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("rate limited by upstream (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("malformed page at cursor {cursor:?}: {reason}")]
    MalformedPage {
        cursor: Option<String>,
        /// Cursor of the following page, when the envelope still carried one.
        next_cursor: Option<Cursor>,
        reason: String,
    },

    #[error("rate limiter timed out after {waited_ms}ms")]
    RateLimitTimeout { waited_ms: u64 },

    #[error("upstream unavailable after {attempts} attempts: {last_error}")]
    IngestionUnavailable { attempts: u32, last_error: String },

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("invalid upstream base URL \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}
