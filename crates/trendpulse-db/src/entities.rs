//! Database operations for the `canonical_entities` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trendpulse_core::{CanonicalEntity, EntityId, EntityKind};

use crate::DbError;

/// A row from the `canonical_entities` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityRow {
    pub id: i64,
    pub kind: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRow {
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if `kind` is not a known entity kind.
    pub fn into_entity(self) -> Result<CanonicalEntity, DbError> {
        let kind: EntityKind = self.kind.parse().map_err(DbError::InvalidRow)?;
        Ok(CanonicalEntity {
            entity_id: EntityId(self.id),
            kind,
            display_name: self.display_name,
            aliases: self.aliases.into_iter().collect(),
            description: self.description,
            archived_at: self.archived_at,
        })
    }
}

const SELECT_ENTITY: &str = "SELECT id, kind, display_name, aliases, description, archived_at, \
                                    created_at, updated_at \
                             FROM canonical_entities";

/// Insert or replace an entity. Aliases are stored sorted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_entity(pool: &PgPool, entity: &CanonicalEntity) -> Result<(), DbError> {
    let aliases: Vec<String> = entity.aliases.iter().cloned().collect();
    sqlx::query(
        "INSERT INTO canonical_entities \
             (id, kind, display_name, aliases, description, archived_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (id) DO UPDATE SET \
             kind = EXCLUDED.kind, \
             display_name = EXCLUDED.display_name, \
             aliases = EXCLUDED.aliases, \
             description = EXCLUDED.description, \
             archived_at = EXCLUDED.archived_at, \
             updated_at = NOW()",
    )
    .bind(entity.entity_id.0)
    .bind(entity.kind.as_str())
    .bind(&entity.display_name)
    .bind(&aliases)
    .bind(&entity.description)
    .bind(entity.archived_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// All entities, archived included, ordered by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_entities(pool: &PgPool) -> Result<Vec<EntityRow>, DbError> {
    let rows = sqlx::query_as::<_, EntityRow>(&format!("{SELECT_ENTITY} ORDER BY id"))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if no entity has `id`, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_entity(pool: &PgPool, id: i64) -> Result<EntityRow, DbError> {
    sqlx::query_as::<_, EntityRow>(&format!("{SELECT_ENTITY} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}
