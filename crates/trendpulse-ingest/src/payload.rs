//! Validation boundary between raw upstream JSON and [`MentionEvent`].
//!
//! The page envelope is `{"events": [...], "next_cursor": "..." | null}`. An
//! envelope that does not match is a [`IngestError::MalformedPage`]; individual
//! events that fail validation are dropped and counted, never coerced.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use trendpulse_core::{EntityKind, MentionEvent};

use crate::error::IngestError;
use crate::source::{Cursor, Page};

#[derive(Debug, Deserialize)]
struct RawCursor {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvents {
    events: Vec<Value>,
}

/// One upstream event as sent on the wire, before range checks.
#[derive(Debug, Deserialize)]
struct RawEvent {
    post_id: String,
    entity_guess: String,
    observed_at: DateTime<Utc>,
    engagement_weight: f64,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse a raw response body fetched at `cursor` into a validated [`Page`].
///
/// # Errors
///
/// Returns [`IngestError::MalformedPage`] when the body is not JSON, not an
/// object, has a non-string `next_cursor`, or lacks an `events` array. The
/// error carries `next_cursor` whenever it could still be read.
pub fn parse_page(body: &str, cursor: Option<&Cursor>) -> Result<Page, IngestError> {
    let malformed = |next_cursor: Option<Cursor>, reason: String| IngestError::MalformedPage {
        cursor: cursor.map(|c| c.0.clone()),
        next_cursor,
        reason,
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| malformed(None, format!("body is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(malformed(None, "body is not a JSON object".to_owned()));
    }

    let next_cursor = RawCursor::deserialize(&value)
        .map_err(|e| malformed(None, format!("invalid next_cursor: {e}")))?
        .next_cursor
        .filter(|c| !c.trim().is_empty())
        .map(Cursor);

    let raw_events = match serde_json::from_value::<RawEvents>(value) {
        Ok(raw) => raw.events,
        Err(e) => return Err(malformed(next_cursor, format!("invalid events array: {e}"))),
    };

    let mut events = Vec::with_capacity(raw_events.len());
    let mut rejected = 0usize;
    for raw in raw_events {
        let post_id = raw
            .get("post_id")
            .and_then(Value::as_str)
            .unwrap_or("<none>")
            .to_owned();
        match validate_event(raw) {
            Ok(event) => events.push(event),
            Err(reason) => {
                rejected += 1;
                tracing::warn!(post_id = %post_id, reason = %reason, "rejecting invalid mention event");
            }
        }
    }

    Ok(Page {
        events,
        next_cursor,
        rejected,
    })
}

/// Validate one raw event object.
///
/// # Errors
///
/// Returns a human-readable reason when a required field is missing or any
/// field has the wrong type or an out-of-range value.
pub fn validate_event(raw: Value) -> Result<MentionEvent, String> {
    let raw: RawEvent = serde_json::from_value(raw).map_err(|e| e.to_string())?;

    for (field, value) in [("post_id", &raw.post_id), ("entity_guess", &raw.entity_guess)] {
        if value.trim().is_empty() {
            return Err(format!("{field} is blank"));
        }
    }

    if !raw.engagement_weight.is_finite() || raw.engagement_weight < 1.0 {
        return Err(format!(
            "engagement_weight {} must be >= 1",
            raw.engagement_weight
        ));
    }

    let kind_hint = raw
        .kind
        .as_deref()
        .map(str::parse::<EntityKind>)
        .transpose()?;

    if let Some(c) = raw.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(format!("confidence {c} is outside [0, 1]"));
        }
    }

    Ok(MentionEvent {
        raw_entity_guess: raw.entity_guess,
        platform_post_id: raw.post_id,
        observed_at: raw.observed_at,
        engagement_weight: raw.engagement_weight,
        kind_hint,
        confidence: raw.confidence,
    })
}
