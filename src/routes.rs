use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    cache::CacheStatistics,
    condition::ResolvedCondition,
    coordinator::RefreshOutcome,
    hub::{AlertSummary, CategoryView, HubError, WeatherHub},
    model::{Category, Location, StationMetadata},
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<WeatherHub>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub station_id: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Serialize)]
pub struct StationResponse {
    pub station_id: String,
    pub metadata: Option<StationMetadata>,
    pub location: Option<Location>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshResponse {
    Updated { stale: bool },
    Failed { error: String },
    Coalesced,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        match outcome {
            RefreshOutcome::Updated { stale } => RefreshResponse::Updated { stale },
            RefreshOutcome::Failed(err) => RefreshResponse::Failed {
                error: err.to_string(),
            },
            RefreshOutcome::Coalesced => RefreshResponse::Coalesced,
        }
    }
}

fn parse_category(raw: &str) -> Result<Category, StatusCode> {
    raw.parse().map_err(|e| {
        tracing::debug!("Rejected category: {}", e);
        StatusCode::BAD_REQUEST
    })
}

fn hub_status(err: HubError) -> StatusCode {
    tracing::debug!("Hub request failed: {}", err);
    match err {
        HubError::CategoryDisabled(_) => StatusCode::NOT_FOUND,
        HubError::LocationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        station_id: state.hub.config().station_id.clone(),
        categories: state.hub.enabled_categories(),
    })
}

pub async fn get_current(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CategoryView>, StatusCode> {
    let category = parse_category(&category)?;
    state.hub.get_current(category).map(Json).map_err(hub_status)
}

pub async fn get_condition(State(state): State<AppState>) -> Json<ResolvedCondition> {
    Json(state.hub.get_resolved_condition())
}

pub async fn get_alerts(State(state): State<AppState>) -> Result<Json<AlertSummary>, StatusCode> {
    state.hub.alert_summary().map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn refresh(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<RefreshResponse>, StatusCode> {
    let category = parse_category(&category)?;
    let outcome = state
        .hub
        .request_refresh(category)
        .await
        .map_err(hub_status)?;
    Ok(Json(outcome.into()))
}

pub async fn cache_stats(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, CacheStatistics>> {
    Json(state.hub.get_cache_stats())
}

pub async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.hub.clear_caches();
    StatusCode::NO_CONTENT
}

pub async fn get_station(State(state): State<AppState>) -> Json<StationResponse> {
    Json(StationResponse {
        station_id: state.hub.config().station_id.clone(),
        metadata: state.hub.station(),
        location: state.hub.location(),
    })
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/current/:category", get(get_current))
        .route("/api/condition", get(get_condition))
        .route("/api/alerts", get(get_alerts))
        .route("/api/refresh/:category", post(refresh))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(clear_cache))
        .route("/api/station", get(get_station))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
