use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::EntityKind;

/// A single observed reference to a fashion entity in upstream content.
///
/// Identity is `platform_post_id`; the normalizer deduplicates on it.
/// `engagement_weight` is always at least `1.0` once an event has passed
/// the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEvent {
    pub raw_entity_guess: String,
    pub platform_post_id: String,
    pub observed_at: DateTime<Utc>,
    pub engagement_weight: f64,
    /// Entity kind suggested by the upstream classifier, if any.
    pub kind_hint: Option<EntityKind>,
    /// Classifier confidence in `[0, 1]`, if reported.
    pub confidence: Option<f64>,
}
