//! HTTP event source for the upstream mention API.
//!
//! Issues `GET {base}/v1/mentions?limit=N[&cursor=C]` with an optional bearer
//! key and hands the body to [`crate::payload::parse_page`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode, Url};

use crate::error::IngestError;
use crate::payload::parse_page;
use crate::source::{Cursor, EventSource, Page};

const USER_AGENT: &str = "trendpulse/0.1 (trend-aggregation)";
const MENTIONS_PATH: &str = "v1/mentions";

/// Client for one upstream mention feed.
///
/// Each `fetch_page` is a single request; wrap it in an
/// [`IngestionClient`](crate::IngestionClient) for rate limiting and retries.
pub struct HttpEventSource {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    page_size: u32,
    name: String,
}

impl HttpEventSource {
    /// Creates a source rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Http`] if the `reqwest::Client` cannot be built,
    /// or [`IngestError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(
        base_url: &str,
        api_key: Option<&str>,
        page_size: u32,
        timeout_secs: u64,
    ) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        // Exactly one trailing slash so `join` appends rather than replaces.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| IngestError::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;
        let name = format!(
            "upstream:{}",
            base_url.host_str().unwrap_or("unknown")
        );

        Ok(Self {
            client,
            base_url,
            api_key: api_key.map(ToOwned::to_owned),
            page_size: page_size.max(1),
            name,
        })
    }

    fn page_url(&self, cursor: Option<&Cursor>) -> Result<Url, IngestError> {
        let mut url = self
            .base_url
            .join(MENTIONS_PATH)
            .map_err(|e| IngestError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.0);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, IngestError> {
        let url = self.page_url(cursor)?;
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            return Err(IngestError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(IngestError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let page = parse_page(&body, cursor)?;
        tracing::debug!(
            cursor = cursor.map_or("<start>", |c| c.0.as_str()),
            events = page.events.len(),
            rejected = page.rejected,
            has_next = page.next_cursor.is_some(),
            "upstream: fetched page"
        );
        Ok(page)
    }
}
