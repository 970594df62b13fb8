use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DIALFLOW_DIR: &str = ".dialflow";
pub const SESSIONS_DIR: &str = ".dialflow/sessions";
pub const LISTS_DIR: &str = ".dialflow/lists";
pub const BRIEFS_DIR: &str = ".dialflow/briefs";
pub const NOTES_DIR: &str = ".dialflow/notes";

pub const CONFIG_FILE: &str = ".dialflow/config.yaml";
pub const SIGNALS_FILE: &str = ".dialflow/signals.json";
pub const OUTBOX_FILE: &str = ".dialflow/outbox.jsonl";
pub const ENROLLMENTS_FILE: &str = ".dialflow/enrollments.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn dialflow_dir(root: &Path) -> PathBuf {
    root.join(DIALFLOW_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn sessions_dir(root: &Path) -> PathBuf {
    root.join(SESSIONS_DIR)
}

pub fn session_path(root: &Path, id: &str) -> PathBuf {
    sessions_dir(root).join(format!("{id}.json"))
}

/// Quarantine destination for a snapshot that failed to parse.
pub fn corrupt_session_path(root: &Path, id: &str) -> PathBuf {
    sessions_dir(root).join(format!("{id}.json.corrupt"))
}

pub fn signals_path(root: &Path) -> PathBuf {
    root.join(SIGNALS_FILE)
}

pub fn lists_dir(root: &Path) -> PathBuf {
    root.join(LISTS_DIR)
}

pub fn list_path(root: &Path, key: &str) -> PathBuf {
    lists_dir(root).join(format!("{key}.json"))
}

pub fn briefs_dir(root: &Path) -> PathBuf {
    root.join(BRIEFS_DIR)
}

pub fn brief_path(root: &Path, campaign_id: &str) -> PathBuf {
    briefs_dir(root).join(format!("{campaign_id}.yaml"))
}

pub fn notes_dir(root: &Path) -> PathBuf {
    root.join(NOTES_DIR)
}

pub fn note_path(root: &Path, contact_id: &str) -> PathBuf {
    notes_dir(root).join(format!("{contact_id}.html"))
}

/// Sidecar holding the last outbound email body for a contact fixture.
pub fn outbound_email_path(root: &Path, contact_id: &str) -> PathBuf {
    notes_dir(root).join(format!("{contact_id}.outbound.txt"))
}

pub fn outbox_path(root: &Path) -> PathBuf {
    root.join(OUTBOX_FILE)
}

pub fn enrollments_path(root: &Path) -> PathBuf {
    root.join(ENROLLMENTS_FILE)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap()
    })
}

/// Validate an identifier that becomes a file name under the data root:
/// session ids, list keys, and campaign ids all pass through here before
/// any path is built from them.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(EngineError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
