use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dialflow_core::EngineError;

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<EngineError>() {
            match e {
                EngineError::NotInitialized => StatusCode::BAD_REQUEST,
                EngineError::SessionNotFound(_) | EngineError::ItemNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::SessionConflict { .. }
                | EngineError::StaleSession(_)
                | EngineError::NotRunnable { .. } => StatusCode::CONFLICT,
                EngineError::InvalidTransition { .. } | EngineError::EmptyPayload(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::InvalidStage(_)
                | EngineError::InvalidKind(_)
                | EngineError::InvalidStatus(_)
                | EngineError::InvalidSignal(_)
                | EngineError::InvalidTimezone(_)
                | EngineError::InvalidDisposition(_)
                | EngineError::InvalidSlug(_)
                | EngineError::InvalidClock(_) => StatusCode::BAD_REQUEST,
                EngineError::Collab(_) => StatusCode::BAD_GATEWAY,
                EngineError::CorruptSnapshot { .. }
                | EngineError::Io(_)
                | EngineError::Yaml(_)
                | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
