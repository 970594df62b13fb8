use thiserror::Error;

use crate::collab::CollabError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not initialized: run 'dialflow init'")]
    NotInitialized,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("active session already exists for '{resource_key}': {existing_id}")]
    SessionConflict {
        resource_key: String,
        existing_id: String,
    },

    #[error("session {0} is stale: idle past the staleness threshold")]
    StaleSession(String),

    #[error("snapshot for session {id} is corrupt: {reason}")]
    CorruptSnapshot { id: String, reason: String },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid session kind: {0}")]
    InvalidKind(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("unrecognized timezone: {0}")]
    InvalidTimezone(String),

    #[error("unknown disposition: {0}")]
    InvalidDisposition(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("invalid clock time '{0}': expected 24-hour HH:MM")]
    InvalidClock(String),

    #[error("empty payload for item {0}: nothing to approve")]
    EmptyPayload(String),

    #[error("session {id} is {status}: {reason}")]
    NotRunnable {
        id: String,
        status: String,
        reason: String,
    },

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
