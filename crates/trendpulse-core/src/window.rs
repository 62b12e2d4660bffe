use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::EntityId;

/// Summed mention activity for one entity in one fixed-size time bucket.
///
/// `weighted_count >= mention_count` always holds because every counted
/// event carries a weight of at least one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWindow {
    pub entity_id: EntityId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mention_count: u64,
    pub weighted_count: f64,
}

impl AggregationWindow {
    #[must_use]
    pub fn empty(entity_id: EntityId, window_start: DateTime<Utc>, spec: BucketSpec) -> Self {
        Self {
            entity_id,
            window_start,
            window_end: window_start + spec.width,
            mention_count: 0,
            weighted_count: 0.0,
        }
    }
}

/// Bucket geometry shared by the aggregation store and the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub width: TimeDelta,
    pub grace: TimeDelta,
}

impl BucketSpec {
    #[must_use]
    pub fn new(width_secs: i64, grace_secs: i64) -> Self {
        Self {
            width: TimeDelta::seconds(width_secs.max(1)),
            grace: TimeDelta::seconds(grace_secs.max(0)),
        }
    }

    fn width_secs(self) -> i64 {
        self.width.num_seconds().max(1)
    }

    /// Start of the bucket containing `ts`.
    #[must_use]
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset = ts.timestamp().rem_euclid(self.width_secs());
        ts - TimeDelta::seconds(offset)
            - TimeDelta::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
    }

    /// Ordinal of the bucket containing `ts`, counted from the Unix epoch.
    #[must_use]
    pub fn bucket_index(self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.width_secs())
    }

    /// A window is closed once `now > window_end + grace`.
    #[must_use]
    pub fn is_closed(self, window_end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > window_end + self.grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly() -> BucketSpec {
        BucketSpec::new(3_600, 300)
    }

    #[test]
    fn bucket_start_floors_to_width() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 10, 42, 17).unwrap();
        let start = hourly().bucket_start(ts);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap());
    }

    #[test]
    fn bucket_start_is_identity_on_boundary() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        assert_eq!(hourly().bucket_start(ts), ts);
    }

    #[test]
    fn bucket_index_is_consecutive_across_hours() {
        let a = Utc.with_ymd_and_hms(2025, 3, 14, 10, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 14, 11, 0, 0).unwrap();
        assert_eq!(hourly().bucket_index(b) - hourly().bucket_index(a), 1);
    }

    #[test]
    fn window_closes_only_after_grace() {
        let spec = hourly();
        let end = Utc.with_ymd_and_hms(2025, 3, 14, 11, 0, 0).unwrap();
        assert!(!spec.is_closed(end, end));
        assert!(!spec.is_closed(end, end + TimeDelta::seconds(300)));
        assert!(spec.is_closed(end, end + TimeDelta::seconds(301)));
    }

    #[test]
    fn empty_window_spans_one_bucket() {
        let start = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let w = AggregationWindow::empty(EntityId(7), start, hourly());
        assert_eq!(w.window_end - w.window_start, TimeDelta::hours(1));
        assert_eq!(w.mention_count, 0);
    }
}
