mod rankings;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use trendpulse_engine::{Engine, EngineError, MetricsSnapshot};
use trendpulse_ingest::RateLimiter;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// The outbound upstream limiter, reported by the health route.
    pub upstream_limiter: Option<Arc<RateLimiter>>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the data is a last-known copy served during a cache failure.
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    engine: MetricsSnapshot,
    upstream_budget: Option<BudgetData>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct BudgetData {
    tokens_remaining: u32,
    refill_in_ms: u64,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            stale: false,
        }
    }

    pub(super) fn with_stale(mut self, stale: bool) -> Self {
        self.stale = stale;
        self
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "query_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

pub(super) fn map_engine_error(request_id: String, error: &EngineError) -> ApiError {
    match error {
        EngineError::QueryUnavailable(_) => {
            tracing::error!(error = %error, "ranking query unavailable");
            ApiError::new(request_id, "query_unavailable", "rankings are temporarily unavailable")
        }
        EngineError::UnknownEntity(id) => {
            ApiError::new(request_id, "not_found", format!("entity {id} not found"))
        }
        _ => {
            tracing::error!(error = %error, "ranking query failed");
            ApiError::new(request_id, "internal_error", "ranking query failed")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/trends", get(rankings::list_trends))
        .route("/api/v1/brands", get(rankings::list_brands))
        .route("/api/v1/styles", get(rankings::list_styles))
        .route("/api/v1/entities/{id}", get(rankings::get_entity))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let upstream_budget = match &state.upstream_limiter {
        Some(limiter) => {
            let budget = limiter.budget().await;
            let wait = budget
                .refill_at
                .saturating_duration_since(tokio::time::Instant::now());
            Some(BudgetData {
                tokens_remaining: budget.tokens_remaining,
                refill_in_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            })
        }
        None => None,
    };

    Json(ApiResponse {
        data: HealthData {
            status: "ok",
            engine: state.engine.metrics(),
            upstream_budget,
        },
        meta: ResponseMeta::new(req_id.0),
    })
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(Arc::new(RateLimiter::new(
        120,
        Duration::from_secs(60),
        Duration::ZERO,
    )))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
