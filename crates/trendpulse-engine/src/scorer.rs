//! Momentum scorer.
//!
//! For the `K + 1` buckets ending at the `as_of` bucket the scorer builds a
//! dense series of weighted counts (missing buckets are zero) and compares an
//! exponentially weighted moving level of that series against the mean of the
//! `K` buckets preceding `as_of`:
//!
//! ```text
//! e_0 = x_0,  e_i = α·x_i + (1 − α)·e_{i−1}
//! baseline = mean(x_0 .. x_{K−1})
//! ratio = e_K / baseline,  score = ratio / (1 + ratio)
//! ```
//!
//! A zero baseline scores `zero_baseline_score` when there is any activity and
//! `0.0` otherwise, whatever the size of that activity: growth against nothing
//! has no ratio to rank by. The entity ranks on its ratio again once its
//! first active bucket falls into the baseline. The score is clamped to
//! `[0, 1]`.

use chrono::{DateTime, Utc};
use trendpulse_core::{AggregationWindow, BucketSpec, EntityId, ScoreSnapshot};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct ScorerConfig {
    /// `K`, the number of trailing buckets forming the baseline.
    pub baseline_windows: usize,
    pub ewma_alpha: f64,
    pub zero_baseline_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MomentumScorer {
    config: ScorerConfig,
    bucket: BucketSpec,
}

impl MomentumScorer {
    #[must_use]
    pub fn new(config: ScorerConfig, bucket: BucketSpec) -> Self {
        Self {
            config: ScorerConfig {
                baseline_windows: config.baseline_windows.max(1),
                ewma_alpha: config.ewma_alpha.clamp(0.0, 1.0),
                zero_baseline_score: config.zero_baseline_score.clamp(0.0, 1.0),
            },
            bucket,
        }
    }

    #[must_use]
    pub fn config(&self) -> ScorerConfig {
        self.config
    }

    /// Start of the most recent bucket that is closed at `now`; the sweep
    /// scores as of this bucket so it only ever reads sealed history.
    #[must_use]
    pub fn sweep_as_of(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket
            .bucket_start(now - self.bucket.width - self.bucket.grace)
    }

    /// Scores `entity_id` as of the bucket containing `as_of`.
    ///
    /// `windows` are the entity's retained windows, oldest first;
    /// `mention_count_total` is reported as given.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Inconsistent`] if a window belongs to another
    /// entity, has a negative or non-finite weighted count, or a weighted
    /// count below its mention count.
    pub fn score(
        &self,
        entity_id: EntityId,
        windows: &[AggregationWindow],
        mention_count_total: u64,
        as_of: DateTime<Utc>,
        computed_at: DateTime<Utc>,
    ) -> Result<ScoreSnapshot, EngineError> {
        let k = self.config.baseline_windows;
        let last = self.bucket.bucket_index(as_of);
        let first = last - i64::try_from(k).unwrap_or(i64::MAX);

        let mut series = vec![0.0_f64; k + 1];
        for window in windows {
            check_window(entity_id, window)?;
            let index = self.bucket.bucket_index(window.window_start);
            if (first..=last).contains(&index) {
                let slot = usize::try_from(index - first).unwrap_or(0);
                series[slot] += window.weighted_count;
            }
        }

        let alpha = self.config.ewma_alpha;
        let level = series[1..]
            .iter()
            .fold(series[0], |e, &x| alpha * x + (1.0 - alpha) * e);

        #[allow(clippy::cast_precision_loss)]
        let baseline = series[..k].iter().sum::<f64>() / k as f64;

        let (momentum_score, growth_rate) = if baseline <= 0.0 {
            if level > 0.0 {
                (self.config.zero_baseline_score, 1.0)
            } else {
                (0.0, 0.0)
            }
        } else {
            let ratio = level / baseline;
            if ratio.is_nan() {
                return Err(EngineError::Inconsistent {
                    entity_id,
                    reason: format!("momentum ratio is NaN (level {level}, baseline {baseline})"),
                });
            }
            let score = if ratio.is_infinite() {
                1.0
            } else {
                ratio / (1.0 + ratio)
            };
            (score.clamp(0.0, 1.0), ratio - 1.0)
        };

        Ok(ScoreSnapshot {
            entity_id,
            momentum_score,
            mention_count_total,
            computed_at,
            growth_rate: if growth_rate.is_finite() {
                growth_rate
            } else {
                f64::MAX
            },
        })
    }
}

fn check_window(entity_id: EntityId, window: &AggregationWindow) -> Result<(), EngineError> {
    let inconsistent = |reason: String| {
        Err(EngineError::Inconsistent {
            entity_id,
            reason,
        })
    };

    if window.entity_id != entity_id {
        return inconsistent(format!(
            "window for entity {} passed to scorer",
            window.entity_id
        ));
    }
    if !window.weighted_count.is_finite() || window.weighted_count < 0.0 {
        return inconsistent(format!(
            "weighted count {} at {}",
            window.weighted_count, window.window_start
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    let mentions = window.mention_count as f64;
    if window.weighted_count < mentions {
        return inconsistent(format!(
            "weighted count {} below mention count {} at {}",
            window.weighted_count, window.mention_count, window.window_start
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "scorer_test.rs"]
mod tests;
