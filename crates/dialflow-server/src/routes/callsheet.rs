use axum::extract::{Path, Query, State};
use axum::Json;
use dialflow_core::callsheet::{self, Zone};
use dialflow_core::error::EngineError;
use serde_json::{json, Value};
use std::str::FromStr;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct CallSheetQuery {
    /// Operator wall clock as 24-hour HH:MM; defaults to the host clock,
    /// which a remote deployment's clock may not match.
    #[serde(default)]
    pub now: Option<String>,
}

/// GET /api/sessions/:id/call-sheet — timezone-ordered dial plan for a
/// session, evaluated against the operator's clock.
pub async fn get_call_sheet(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<CallSheetQuery>,
) -> Result<Json<Value>, AppError> {
    let engine = app.engine.clone();
    let body = tokio::task::spawn_blocking(move || {
        let session = engine.store().get(&id)?;
        let zone = Zone::from_str(&engine.config().operator.timezone)?;
        let operator_now = match q.now.as_deref() {
            Some(clock) => callsheet::parse_clock(clock)?,
            None => chrono::Local::now().time(),
        };
        let entries = callsheet::build(&session, zone, operator_now);
        let summary = callsheet::render_summary(&session, &entries);
        Ok::<_, EngineError>(json!({
            "session_id": session.id,
            "operator_timezone": zone,
            "entries": entries,
            "summary": summary,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(body))
}
