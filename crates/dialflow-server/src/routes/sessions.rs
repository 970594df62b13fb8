use axum::extract::{Path, Query, State};
use axum::Json;
use dialflow_core::pipeline::StartMeta;
use dialflow_core::session::Session;
use dialflow_core::types::SessionKind;
use std::str::FromStr;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct CreateSessionBody {
    pub kind: String,
    pub resource_key: String,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub calling_date: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
}

/// POST /api/sessions — create a session; prospecting fetches its brief here.
pub async fn create_session(
    State(app): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<Session>, AppError> {
    let kind = SessionKind::from_str(&body.kind)?;
    let meta = StartMeta {
        campaign: body.campaign,
        calling_date: body.calling_date,
        sequence: body.sequence,
    };
    let session = app.engine.start(kind, &body.resource_key, meta).await?;
    Ok(Json(session))
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    /// Include terminal sessions; default is active only.
    #[serde(default)]
    pub all: bool,
}

/// GET /api/sessions — list sessions in creation order.
pub async fn list_sessions(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Session>>, AppError> {
    let engine = app.engine.clone();
    let sessions = tokio::task::spawn_blocking(move || {
        if q.all {
            engine.store().list()
        } else {
            engine.store().list_active()
        }
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;
    Ok(Json(sessions))
}

/// GET /api/sessions/:id — session detail with items and stats.
pub async fn get_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session = tokio::task::spawn_blocking(move || engine.store().get(&id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}

/// POST /api/sessions/:id/advance — run forward to the next gate or terminal
/// state. Watch the events stream for per-item progress while this runs.
pub async fn advance_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    let session = app.engine.advance(&id).await?;
    Ok(Json(session))
}

#[derive(serde::Deserialize)]
pub struct ApproveBody {
    /// Specific item ids; omitted approves every generated item.
    #[serde(default)]
    pub items: Option<Vec<String>>,
}

/// POST /api/sessions/:id/approve — approve gated items.
pub async fn approve_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session = tokio::task::spawn_blocking(move || engine.approve(&id, body.items.as_deref()))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}

#[derive(serde::Deserialize)]
pub struct RejectBody {
    pub items: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/sessions/:id/reject — reject gated items with an optional reason.
pub async fn reject_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session =
        tokio::task::spawn_blocking(move || engine.reject(&id, &body.items, body.reason.as_deref()))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}

#[derive(serde::Deserialize)]
pub struct EditBody {
    pub item: String,
    pub payload: serde_json::Value,
}

/// POST /api/sessions/:id/edit — replace one gated item's payload.
pub async fn edit_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EditBody>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session = tokio::task::spawn_blocking(move || engine.edit(&id, &body.item, body.payload))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}

#[derive(serde::Deserialize)]
pub struct RetryBody {
    pub items: Vec<String>,
}

/// POST /api/sessions/:id/retry — requeue errored items as pending.
pub async fn retry_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RetryBody>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session = tokio::task::spawn_blocking(move || engine.retry_items(&id, &body.items))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}

/// POST /api/sessions/:id/abort — abort an active session.
pub async fn abort_session(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    let engine = app.engine.clone();
    let session = tokio::task::spawn_blocking(move || engine.abort(&id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(session))
}
