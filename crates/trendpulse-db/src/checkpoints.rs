//! Database operations for the `ingest_checkpoints` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRow {
    pub source: String,
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_checkpoint(pool: &PgPool, source: &str) -> Result<Option<CheckpointRow>, DbError> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "SELECT source, cursor, updated_at FROM ingest_checkpoints WHERE source = $1",
    )
    .bind(source)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn save_checkpoint(pool: &PgPool, source: &str, cursor: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO ingest_checkpoints (source, cursor) VALUES ($1, $2) \
         ON CONFLICT (source) DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = NOW()",
    )
    .bind(source)
    .bind(cursor)
    .execute(pool)
    .await?;
    Ok(())
}
