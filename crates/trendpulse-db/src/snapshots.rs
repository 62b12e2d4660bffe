//! Database operations for the `score_snapshots` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trendpulse_core::{EntityId, EntityKind, ScoreSnapshot};

use crate::{to_i64, to_u64, DbError};

/// A row from the `score_snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub entity_id: i64,
    pub momentum_score: f64,
    pub mention_count_total: i64,
    pub growth_rate: f64,
    pub computed_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if `mention_count_total` is negative.
    pub fn into_snapshot(self) -> Result<ScoreSnapshot, DbError> {
        Ok(ScoreSnapshot {
            entity_id: EntityId(self.entity_id),
            momentum_score: self.momentum_score,
            mention_count_total: to_u64(self.mention_count_total, "mention_count_total")?,
            computed_at: self.computed_at,
            growth_rate: self.growth_rate,
        })
    }
}

/// A latest snapshot joined with its entity, for ranking printouts.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankedSnapshotRow {
    pub entity_id: i64,
    pub display_name: String,
    pub momentum_score: f64,
    pub mention_count_total: i64,
    pub growth_rate: f64,
    pub computed_at: DateTime<Utc>,
}

/// Append a snapshot and return its generated id.
///
/// # Errors
///
/// Returns [`DbError::InvalidRow`] if the total overflows `BIGINT`, or
/// [`DbError::Sqlx`] if the insert fails.
pub async fn insert_snapshot(pool: &PgPool, snapshot: &ScoreSnapshot) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO score_snapshots \
             (entity_id, momentum_score, mention_count_total, growth_rate, computed_at) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id",
    )
    .bind(snapshot.entity_id.0)
    .bind(snapshot.momentum_score)
    .bind(to_i64(snapshot.mention_count_total, "mention_count_total")?)
    .bind(snapshot.growth_rate)
    .bind(snapshot.computed_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Most recent snapshot per entity.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_snapshots(pool: &PgPool) -> Result<Vec<SnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT DISTINCT ON (entity_id) \
                id, entity_id, momentum_score, mention_count_total, growth_rate, computed_at \
         FROM score_snapshots \
         ORDER BY entity_id, computed_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Latest snapshots of non-archived entities of `kind`, in ranking order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn top_snapshots_by_kind(
    pool: &PgPool,
    kind: EntityKind,
    limit: i64,
) -> Result<Vec<RankedSnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, RankedSnapshotRow>(
        "SELECT latest.entity_id, e.display_name, latest.momentum_score, \
                latest.mention_count_total, latest.growth_rate, latest.computed_at \
         FROM ( \
             SELECT DISTINCT ON (entity_id) \
                    entity_id, momentum_score, mention_count_total, growth_rate, computed_at \
             FROM score_snapshots \
             ORDER BY entity_id, computed_at DESC, id DESC \
         ) latest \
         JOIN canonical_entities e ON e.id = latest.entity_id \
         WHERE e.kind = $1 AND e.archived_at IS NULL \
         ORDER BY latest.momentum_score DESC, latest.mention_count_total DESC, latest.entity_id \
         LIMIT $2",
    )
    .bind(kind.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
