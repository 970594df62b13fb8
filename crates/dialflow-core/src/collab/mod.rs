use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod local;

// ---------------------------------------------------------------------------
// CollabError
// ---------------------------------------------------------------------------

/// The one error type crossing a collaborator boundary. Each implementation
/// classifies its own failures: rate limits, timeouts and 5xx-equivalents are
/// transient; auth, validation and not-found are fatal.
#[derive(Debug, Clone, Error)]
pub enum CollabError {
    #[error("transient collaborator error: {message}")]
    Transient {
        message: String,
        /// Server-supplied backoff hint; overrides the computed delay.
        retry_after: Option<Duration>,
    },

    #[error("fatal collaborator error: {message}")]
    Fatal { message: String },
}

impl CollabError {
    pub fn transient(message: impl Into<String>) -> Self {
        CollabError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient_after(message: impl Into<String>, retry_after: Duration) -> Self {
        CollabError::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        CollabError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CollabError::Fatal { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CollabError::Transient { retry_after, .. } => *retry_after,
            CollabError::Fatal { .. } => None,
        }
    }
}

pub type CollabResult<T> = std::result::Result<T, CollabError>;

// ---------------------------------------------------------------------------
// ContactRecord
// ---------------------------------------------------------------------------

/// Contact as the CRM hands it over. `external_id` is a foreign key into the
/// CRM; dialflow references it but never owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Crm: Send + Sync {
    async fn fetch_items(&self, resource_key: &str) -> CollabResult<Vec<ContactRecord>>;

    async fn write_note(&self, contact_id: &str, html: &str) -> CollabResult<()>;

    async fn fetch_last_outbound_email(&self, contact_id: &str) -> CollabResult<Option<String>>;
}

#[async_trait]
pub trait ContentAi: Send + Sync {
    /// Produce call-prep content for one contact. The result is opaque to the
    /// engine beyond a non-emptiness check.
    async fn generate(&self, ctx: &Value) -> CollabResult<Value>;

    /// Score a prospect; the result must carry a numeric `score` field.
    async fn qualify(&self, ctx: &Value) -> CollabResult<Value>;

    /// Return extra fields to merge into the item payload.
    async fn enrich(&self, ctx: &Value) -> CollabResult<Value>;
}

#[async_trait]
pub trait BriefSource: Send + Sync {
    /// ICP/persona fields for a campaign, read once at session creation.
    async fn fetch_brief(&self, campaign_id: &str) -> CollabResult<Value>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery: callers log failures and move on.
    async fn post(&self, channel: &str, message: &str) -> CollabResult<()>;
}

#[async_trait]
pub trait Sequencer: Send + Sync {
    async fn enroll(&self, contact_id: &str, sequence_id: &str) -> CollabResult<()>;

    async fn advance(&self, contact_id: &str) -> CollabResult<()>;

    async fn remove(&self, contact_id: &str) -> CollabResult<()>;
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The full collaborator set, injected as trait objects. Cloning shares the
/// underlying implementations.
#[derive(Clone)]
pub struct Collaborators {
    pub crm: Arc<dyn Crm>,
    pub ai: Arc<dyn ContentAi>,
    pub briefs: Arc<dyn BriefSource>,
    pub notifier: Arc<dyn Notifier>,
    pub sequencer: Arc<dyn Sequencer>,
}

impl Collaborators {
    /// File-backed set rooted at a project directory, for offline runs and
    /// tests.
    pub fn local(root: &Path) -> Self {
        Self {
            crm: Arc::new(local::LocalCrm::new(root)),
            ai: Arc::new(local::TemplateAi),
            briefs: Arc::new(local::FileBriefs::new(root)),
            notifier: Arc::new(local::FileNotifier::new(root)),
            sequencer: Arc::new(local::FileSequencer::new(root)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
