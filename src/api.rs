//! HTTP API: client and alert management, refresh/cancel, run status and the
//! coverage listing.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::db::{ArticleFilter, Database, DEFAULT_ARTICLE_LIMIT};
use crate::error::CoordinatorError;
use crate::runs::RunCoordinator;
use crate::TARGET_WEB_REQUEST;

/// Runs listed on the client view.
const RECENT_RUNS_LIMIT: i64 = 10;

static STARTED_AT: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub coordinator: RunCoordinator,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            coordinator: RunCoordinator::new(db.clone()),
            db,
        }
    }
}

/// Error responses, always `{"error": ...}` plus `run_id` on conflicts.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict { message: String, run_id: String },
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response(),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response(),
            ApiError::Conflict { message, run_id } => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message, "run_id": run_id })),
            )
                .into_response(),
            ApiError::Internal(message) => {
                error!(target: TARGET_WEB_REQUEST, "Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Internal server error" }))).into_response()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Conflict { run_id } => ApiError::Conflict {
                message: "A run is already in progress".to_string(),
                run_id,
            },
            CoordinatorError::NotFound => ApiError::NotFound("Run not found".to_string()),
            CoordinatorError::NotActive => ApiError::BadRequest("Run is not active".to_string()),
            CoordinatorError::Validation(message) => ApiError::BadRequest(message),
            CoordinatorError::Store(err) => ApiError::Internal(err.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_check))
        .route("/clients", post(create_client))
        .route("/clients/{id}", get(get_client).delete(delete_client))
        .route("/clients/{id}/alerts", post(add_alert))
        .route("/clients/{id}/alerts/{alert_id}", delete(delete_alert))
        .route("/clients/{id}/refresh", post(refresh_client))
        .route("/clients/{id}/coverage", get(list_coverage))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/cancel", post(cancel_run))
        .with_state(state)
}

/// Binds `0.0.0.0:port` and serves the API until the process exits.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    Lazy::force(&STARTED_AT);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(target: TARGET_WEB_REQUEST, "Server running on http://{}", addr);

    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

async fn status_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.db.collect_stats().await?;
    let uptime = (Utc::now() - *STARTED_AT).num_seconds();
    Ok(Json(json!({ "status": "OK", "stats": stats, "uptime_secs": uptime })))
}

#[derive(Deserialize)]
struct CreateClientRequest {
    org_id: String,
    name: String,
    description: Option<String>,
}

async fn create_client(
    State(state): State<AppState>,
    Json(payload): Json<CreateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = payload.org_id.trim();
    let name = payload.name.trim();
    if org_id.is_empty() {
        return Err(ApiError::BadRequest("Organization is required".to_string()));
    }
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }
    let description = payload.description.as_deref().map(str::trim).filter(|d| !d.is_empty());

    let client = state.db.create_client(org_id, name, description).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn get_client(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let client = state
        .db
        .get_client(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Client not found".to_string()))?;
    let alerts = state.db.list_alerts(&id).await?;
    let runs = state.db.recent_runs(&id, RECENT_RUNS_LIMIT).await?;

    Ok(Json(json!({ "client": client, "alerts": alerts, "runs": runs })))
}

async fn delete_client(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.db.delete_client(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Client not found".to_string()))
    }
}

#[derive(Deserialize)]
struct AddAlertRequest {
    #[serde(default)]
    query: String,
    label: Option<String>,
}

async fn add_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AddAlertRequest>,
) -> ApiResult<impl IntoResponse> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Search term is required".to_string()));
    }
    let label = payload.label.as_deref().map(str::trim).filter(|l| !l.is_empty());

    if state.db.get_client(&id).await?.is_none() {
        return Err(ApiError::NotFound("Client not found".to_string()));
    }

    let alert = state.db.add_alert(&id, query, label).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn delete_alert(
    State(state): State<AppState>,
    Path((id, alert_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.db.delete_alert(&id, &alert_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Alert not found".to_string()))
    }
}

async fn refresh_client(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let run = state.coordinator.enqueue(&id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "run_id": run.id, "status": run.status })),
    ))
}

#[derive(Deserialize)]
struct CoverageQuery {
    from: Option<String>,
    to: Option<String>,
    q: Option<String>,
    #[serde(rename = "minScore")]
    min_score: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` date, which is read
/// as midnight UTC.
fn parse_bound(name: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(date.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Some(d.and_utc()))
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid '{}' timestamp", name)))
}

async fn list_coverage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CoverageQuery>,
) -> ApiResult<Json<crate::db::ArticlePage>> {
    if state.db.get_client(&id).await?.is_none() {
        return Err(ApiError::NotFound("Client not found".to_string()));
    }

    let filter = ArticleFilter {
        from: parse_bound("from", params.from.as_deref())?,
        to: parse_bound("to", params.to.as_deref())?,
        text: params.q,
        min_relevance: params.min_score,
        limit: params.limit.unwrap_or(DEFAULT_ARTICLE_LIMIT),
        offset: params.offset.unwrap_or(0),
    };

    Ok(Json(state.db.query_articles(&id, &filter).await?))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<Json<crate::db::Run>> {
    Ok(Json(state.coordinator.status(&run_id).await?))
}

async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let run = state.coordinator.cancel(&run_id).await?;
    Ok(Json(json!({ "success": true, "run": run })))
}
