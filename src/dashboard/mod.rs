use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::db::models::SnapshotFilter;
use crate::db::{Database, PersistenceGateway};
use crate::live_scores::PollingScheduler;

const DEFAULT_EVENT_LIMIT: i64 = 50;
const MAX_EVENT_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: PollingScheduler,
    pub db: Database,
    /// Interval used by `POST /api/polling/start` when none is given
    pub default_interval: Duration,
}

/// Build the Axum router for the admin API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/live", get(live_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/events", get(events_handler))
        .route("/api/export", get(export_handler))
        .route("/api/polling/start", post(start_handler))
        .route("/api/polling/stop", post(stop_handler))
        .route("/api/cache/clear", post(clear_cache_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/live
async fn live_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.get_live_matches())
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.get_statistics())
}

/// GET /api/matches?status=LIVE&competition=PL
async fn matches_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SnapshotFilter>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_snapshots(&filter)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<i64>,
}

/// GET /api/events?limit=50
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    state
        .db
        .list_recent_events(limit)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/export
async fn export_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.export_document())
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    interval_secs: Option<u64>,
}

/// POST /api/polling/start?interval_secs=30
async fn start_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StartQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let interval = match query.interval_secs {
        Some(0) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "interval_secs must be positive".to_string(),
            ))
        }
        Some(secs) => Duration::from_secs(secs),
        None => state.default_interval,
    };
    let started = state.scheduler.start(interval);
    Ok(Json(serde_json::json!({
        "started": started,
        "running": state.scheduler.is_running(),
        "interval_secs": interval.as_secs(),
    })))
}

/// POST /api/polling/stop
async fn stop_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stopped = state.scheduler.stop().await;
    Json(serde_json::json!({
        "stopped": stopped,
        "running": state.scheduler.is_running(),
    }))
}

/// POST /api/cache/clear
async fn clear_cache_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.scheduler.client().clear_cache();
    Json(state.scheduler.client().rate_limit_status())
}
