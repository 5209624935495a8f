//! Admin trigger surface. Query routes are public; mutating routes require
//! the operator bearer token: 401 on mismatch, 503 when no token is
//! configured, 409 when a run is already in flight.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use newsloom_common::{NewsloomError, PipelineMode};
use newsloom_pipeline::{PipelineManager, RunParams};
use newsloom_sources::{HealthStore, SourceDiscovery};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PipelineManager>,
    pub health: Arc<HealthStore>,
    pub discovery: Option<Arc<SourceDiscovery>>,
    pub operator_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/pipeline/start", post(start_pipeline))
        .route("/admin/pipeline/stop", post(stop_pipeline))
        .route("/admin/pipeline/status", get(pipeline_status))
        .route("/admin/pipeline/logs", get(pipeline_logs))
        .route("/admin/sources/blacklist", get(blacklist).delete(clear_blacklist))
        .route("/admin/sources/blacklist/{domain}", delete(unblacklist_domain))
        .route("/admin/sources/health", get(sources_health))
        .route("/admin/sources/discover", post(discover_source))
        .with_state(state)
}

/// Operator auth for mutating routes.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.operator_token.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "operator token not configured"})),
        )
            .into_response());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid or missing operator token"})),
        )
            .into_response());
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct StartRequest {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default)]
    topics: Option<Vec<String>>,
    #[serde(default)]
    max_articles_per_source: Option<usize>,
}

async fn start_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let mode = match request.mode.as_deref() {
        None => PipelineMode::Scrape,
        Some(raw) => match PipelineMode::from_str(raw) {
            Ok(mode) => mode,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response()
            }
        },
    };
    let params = RunParams {
        mode,
        sources: request.sources,
        topics: request.topics.unwrap_or_default(),
        max_articles_per_source: request.max_articles_per_source.unwrap_or(20),
    };
    match state.manager.start(params).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "started", "mode": mode.to_string()})),
        )
            .into_response(),
        Err(NewsloomError::PipelineBusy) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "a pipeline run is already in progress"})),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Pipeline start failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn stop_pipeline(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let status = state.manager.stop();
    Json(json!({"status": status.to_string()})).into_response()
}

async fn pipeline_status(State(state): State<AppState>) -> Response {
    Json(state.manager.status()).into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

async fn pipeline_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    Json(state.manager.logs(query.limit, query.offset)).into_response()
}

async fn blacklist(State(state): State<AppState>) -> Response {
    let entries: Vec<serde_json::Value> = state
        .health
        .blacklist_entries()
        .await
        .into_iter()
        .map(|(domain, reason)| json!({"domain": domain, "reason": reason}))
        .collect();
    Json(entries).into_response()
}

async fn clear_blacklist(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.health.clear_blacklist().await;
    Json(json!({"status": "cleared"})).into_response()
}

async fn unblacklist_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.health.unblacklist(&domain).await;
    Json(json!({"status": "cleared", "domain": domain})).into_response()
}

async fn sources_health(State(state): State<AppState>) -> Response {
    Json(state.health.health_report().await).into_response()
}

#[derive(Debug, Deserialize)]
struct DiscoverRequest {
    domain: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn discover_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DiscoverRequest>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let Some(discovery) = state.discovery.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "discovery backend not configured"})),
        )
            .into_response();
    };
    let reason = request.reason.unwrap_or_else(|| "operator request".to_string());
    tokio::spawn(async move {
        if let Err(e) = discovery.discover_replacement(&request.domain, &reason).await {
            warn!(domain = %request.domain, error = %e, "Operator-requested discovery failed");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"status": "scheduled"}))).into_response()
}
