use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trendpulse_core::{EntityId, EntityKind, TrendCategory, TrendDirection};
use trendpulse_engine::{RankedEntity, SortOrder};

use crate::middleware::RequestId;

use super::{map_engine_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RankingQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RankedItem {
    id: i64,
    name: String,
    category: EntityKind,
    momentum_score: f64,
    mention_count: u64,
    description: Option<String>,
    growth_rate: f64,
    trend_direction: TrendDirection,
    trend_category: TrendCategory,
    computed_at: DateTime<Utc>,
}

impl From<RankedEntity> for RankedItem {
    fn from(ranked: RankedEntity) -> Self {
        let trend_direction = ranked.snapshot.direction();
        let trend_category = ranked.snapshot.category();
        Self {
            id: ranked.snapshot.entity_id.0,
            name: ranked.display_name,
            category: ranked.kind,
            momentum_score: ranked.snapshot.momentum_score,
            mention_count: ranked.snapshot.mention_count_total,
            description: ranked.description,
            growth_rate: ranked.snapshot.growth_rate,
            trend_direction,
            trend_category,
            computed_at: ranked.snapshot.computed_at,
        }
    }
}

pub(super) async fn list_trends(
    state: State<AppState>,
    req_id: Extension<RequestId>,
    query: Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<RankedItem>>>, ApiError> {
    list_ranked(EntityKind::Trend, state, req_id, query).await
}

pub(super) async fn list_brands(
    state: State<AppState>,
    req_id: Extension<RequestId>,
    query: Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<RankedItem>>>, ApiError> {
    list_ranked(EntityKind::Brand, state, req_id, query).await
}

pub(super) async fn list_styles(
    state: State<AppState>,
    req_id: Extension<RequestId>,
    query: Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<RankedItem>>>, ApiError> {
    list_ranked(EntityKind::Style, state, req_id, query).await
}

async fn list_ranked(
    kind: EntityKind,
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<RankedItem>>>, ApiError> {
    let sort = match query.sort.as_deref() {
        None => SortOrder::default(),
        Some(raw) => raw
            .parse::<SortOrder>()
            .map_err(|reason| ApiError::new(req_id.0.clone(), "validation_error", reason))?,
    };
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "offset must not be negative",
        ));
    }

    // Both values are non-negative here.
    let limit = usize::try_from(normalize_limit(query.limit)).unwrap_or(1);
    let offset = usize::try_from(offset).unwrap_or(0);

    let page = state
        .engine
        .query()
        .get_ranked_entities(kind, sort, limit, offset)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: page.items.into_iter().map(RankedItem::from).collect(),
        meta: ResponseMeta::new(req_id.0).with_stale(page.stale),
    }))
}

pub(super) async fn get_entity(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RankedItem>>, ApiError> {
    let view = state
        .engine
        .query()
        .get_entity(EntityId(id))
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    let Some(item) = view.item else {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("entity {id} not found"),
        ));
    };

    Ok(Json(ApiResponse {
        data: RankedItem::from(item),
        meta: ResponseMeta::new(req_id.0).with_stale(view.stale),
    }))
}
