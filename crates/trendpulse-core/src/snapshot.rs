use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::EntityId;

/// Latest derived momentum for one entity. Replaceable; never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub entity_id: EntityId,
    /// Always within `[0, 1]`.
    pub momentum_score: f64,
    pub mention_count_total: u64,
    pub computed_at: DateTime<Utc>,
    /// Recent rate relative to baseline, minus one. `0.0` when there is no baseline.
    pub growth_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendCategory {
    Viral,
    Trending,
    Growing,
    Stable,
    Declining,
}

impl ScoreSnapshot {
    /// More than 10% growth either way counts as a direction.
    #[must_use]
    pub fn direction(&self) -> TrendDirection {
        if self.growth_rate > 0.1 {
            TrendDirection::Increasing
        } else if self.growth_rate < -0.1 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }

    #[must_use]
    pub fn category(&self) -> TrendCategory {
        match self.momentum_score {
            s if s > 0.8 => TrendCategory::Viral,
            s if s > 0.6 => TrendCategory::Trending,
            s if s > 0.4 => TrendCategory::Growing,
            s if s > 0.2 => TrendCategory::Stable,
            _ => TrendCategory::Declining,
        }
    }
}
