use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trendpulse_core::MentionEvent;

use crate::error::IngestError;

/// Opaque upstream pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One validated page of upstream events.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub events: Vec<MentionEvent>,
    pub next_cursor: Option<Cursor>,
    /// Events dropped at the validation boundary.
    pub rejected: usize,
}

/// A paginated source of mention events.
///
/// Implementations perform exactly one outbound call per `fetch_page`; rate
/// limiting and retries are layered on top by [`IngestionClient`].
///
/// [`IngestionClient`]: crate::IngestionClient
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable name used as the checkpoint key.
    fn name(&self) -> &str;

    /// Fetch the page at `cursor`, or the first page when `cursor` is `None`.
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, IngestError>;
}
