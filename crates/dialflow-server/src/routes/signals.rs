use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use dialflow_core::error::EngineError;
use dialflow_core::signals::{self, Disposition, Signal};
use serde_json::{json, Value};
use std::str::FromStr;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct IngestBody {
    pub contact_id: String,
    pub signal_type: String,
    #[serde(default)]
    pub strength: Option<u32>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// POST /api/signals — ingest one engagement signal and report the
/// contact's resulting tier.
pub async fn ingest_signal(
    State(app): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<Value>, AppError> {
    if body.contact_id.trim().is_empty() {
        return Err(EngineError::InvalidSignal("contact_id must not be empty".to_string()).into());
    }
    if body.signal_type.trim().is_empty() {
        return Err(EngineError::InvalidSignal("signal_type must not be empty".to_string()).into());
    }
    let signal = Signal {
        contact_id: body.contact_id.clone(),
        signal_type: body.signal_type,
        strength: body.strength.unwrap_or(1),
        observed_at: body.observed_at.unwrap_or_else(Utc::now),
    };

    let contact_id = body.contact_id;
    let root = app.root.clone();
    let ledger = app.ledger.clone();
    let payload = tokio::task::spawn_blocking(move || {
        let mut ledger = ledger.lock().expect("signal ledger lock poisoned");
        let outcome = ledger.ingest(signal);
        ledger.save(&root)?;
        let tier = ledger.classify(&contact_id, Utc::now());
        Ok::<_, EngineError>(json!({
            "contact_id": contact_id,
            "outcome": outcome,
            "tier": tier,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(payload))
}

/// GET /api/contacts/:id/tier — classify a contact from its live signals.
pub async fn get_tier(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let ledger = app.ledger.lock().expect("signal ledger lock poisoned");
    let tier = ledger.classify(&id, Utc::now());
    Ok(Json(json!({ "contact_id": id, "tier": tier })))
}

#[derive(serde::Deserialize)]
pub struct DispositionBody {
    pub disposition: String,
}

/// POST /api/contacts/:id/disposition — log a call outcome and run its
/// sequence action against the sequencer.
pub async fn apply_disposition(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DispositionBody>,
) -> Result<Json<Value>, AppError> {
    let disposition = Disposition::from_str(&body.disposition)?;
    let route = signals::apply_disposition(
        app.engine.collab().sequencer.as_ref(),
        &id,
        disposition,
        &app.engine.config().signals.nurture_sequence,
    )
    .await?;
    Ok(Json(json!({
        "contact_id": id,
        "disposition": disposition,
        "route": route,
    })))
}
