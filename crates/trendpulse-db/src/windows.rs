//! Database operations for the `aggregation_windows` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trendpulse_core::{AggregationWindow, EntityId};
use trendpulse_engine::StoredWindow;

use crate::{to_i64, to_u64, DbError};

/// A row from the `aggregation_windows` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WindowRow {
    pub entity_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub is_late: bool,
    pub is_sealed: bool,
    pub mention_count: i64,
    pub weighted_count: f64,
}

impl WindowRow {
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if `mention_count` is negative.
    pub fn into_stored(self) -> Result<StoredWindow, DbError> {
        Ok(StoredWindow {
            window: AggregationWindow {
                entity_id: EntityId(self.entity_id),
                window_start: self.window_start,
                window_end: self.window_end,
                mention_count: to_u64(self.mention_count, "mention_count")?,
                weighted_count: self.weighted_count,
            },
            late: self.is_late,
            sealed: self.is_sealed,
        })
    }
}

/// Insert or overwrite the window keyed by `(entity_id, window_start, is_late)`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRow`] if the count overflows `BIGINT`, or
/// [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_window(pool: &PgPool, stored: &StoredWindow) -> Result<(), DbError> {
    let w = &stored.window;
    sqlx::query(
        "INSERT INTO aggregation_windows \
             (entity_id, window_start, window_end, is_late, is_sealed, mention_count, weighted_count) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (entity_id, window_start, is_late) DO UPDATE SET \
             window_end = EXCLUDED.window_end, \
             is_sealed = aggregation_windows.is_sealed OR EXCLUDED.is_sealed, \
             mention_count = EXCLUDED.mention_count, \
             weighted_count = EXCLUDED.weighted_count, \
             updated_at = NOW()",
    )
    .bind(w.entity_id.0)
    .bind(w.window_start)
    .bind(w.window_end)
    .bind(stored.late)
    .bind(stored.sealed)
    .bind(to_i64(w.mention_count, "mention_count")?)
    .bind(w.weighted_count)
    .execute(pool)
    .await?;
    Ok(())
}

/// Windows starting at or after `since`, ordered by start then entity.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_windows_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<WindowRow>, DbError> {
    let rows = sqlx::query_as::<_, WindowRow>(
        "SELECT entity_id, window_start, window_end, is_late, is_sealed, \
                mention_count, weighted_count \
         FROM aggregation_windows \
         WHERE window_start >= $1 \
         ORDER BY window_start, entity_id, is_late",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
