//! File-backed collaborators. These run the whole engine against `.dialflow/`
//! fixtures so the CLI works offline and tests never need a live CRM.

use crate::collab::{BriefSource, CollabError, CollabResult, ContactRecord, ContentAi, Crm, Notifier, Sequencer};
use crate::paths;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

fn read_fixture(path: &Path, what: &str) -> CollabResult<String> {
    if !path.exists() {
        return Err(CollabError::fatal(format!(
            "{what} not found at {}",
            path.display()
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| CollabError::transient(format!("reading {}: {e}", path.display())))
}

/// List keys and campaign ids name fixture files, so they are held to slug
/// rules before any path is built from them.
fn require_slug(value: &str) -> CollabResult<()> {
    paths::validate_slug(value).map_err(|e| CollabError::fatal(e.to_string()))
}

/// Contact ids come from the CRM, so the character set is looser than a
/// slug, but an id still names exactly one file under `notes/`.
fn require_contact_id(id: &str) -> CollabResult<()> {
    let clean = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if clean {
        Ok(())
    } else {
        Err(CollabError::fatal(format!(
            "invalid contact id '{id}': must contain only letters, digits, hyphens, and underscores"
        )))
    }
}

// ---------------------------------------------------------------------------
// LocalCrm
// ---------------------------------------------------------------------------

/// Contact lists live in `lists/<key>.json`; written notes land beside them
/// in `notes/<id>.html`, with outbound email context in a `.outbound.txt`
/// sidecar per contact.
pub struct LocalCrm {
    root: PathBuf,
}

impl LocalCrm {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Crm for LocalCrm {
    async fn fetch_items(&self, resource_key: &str) -> CollabResult<Vec<ContactRecord>> {
        require_slug(resource_key)?;
        let path = paths::list_path(&self.root, resource_key);
        let raw = read_fixture(&path, &format!("contact list '{resource_key}'"))?;
        let records: Vec<ContactRecord> = serde_json::from_str(&raw)
            .map_err(|e| CollabError::fatal(format!("malformed list {}: {e}", path.display())))?;
        debug!(resource_key, count = records.len(), "loaded contact list");
        Ok(records)
    }

    async fn write_note(&self, contact_id: &str, html: &str) -> CollabResult<()> {
        require_contact_id(contact_id)?;
        let path = paths::note_path(&self.root, contact_id);
        crate::io::atomic_write(&path, html.as_bytes())
            .map_err(|e| CollabError::transient(format!("writing note for {contact_id}: {e}")))
    }

    async fn fetch_last_outbound_email(&self, contact_id: &str) -> CollabResult<Option<String>> {
        require_contact_id(contact_id)?;
        let path = paths::outbound_email_path(&self.root, contact_id);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| CollabError::transient(format!("reading outbound email: {e}")))
    }
}

// ---------------------------------------------------------------------------
// TemplateAi
// ---------------------------------------------------------------------------

/// Deterministic content synthesis. Same context in, same payload out, so
/// resume and idempotency tests can assert exact artifacts.
pub struct TemplateAi;

fn ctx_str<'a>(ctx: &'a Value, key: &str) -> Option<&'a str> {
    ctx.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl ContentAi for TemplateAi {
    async fn generate(&self, ctx: &Value) -> CollabResult<Value> {
        let name = ctx_str(ctx, "name").unwrap_or("there");
        let first = name.split_whitespace().next().unwrap_or(name);
        let company = ctx_str(ctx, "company").unwrap_or("your team");
        let title = ctx_str(ctx, "title").unwrap_or("your role");
        let email_context = match ctx_str(ctx, "last_email") {
            Some(_) => "following up on my last email",
            None => "reaching out cold",
        };
        Ok(json!({
            "script": format!(
                "Hi {first}, I'm {email_context} because teams like {company} \
                 usually hit a wall with manual prep. As {title}, is that on \
                 your plate this quarter?"
            ),
            "voicemail": format!(
                "Hi {first}, sorry I missed you. I'll send a short note to \
                 your inbox so you have it in writing."
            ),
            "objections": [
                "Already have a vendor: ask what the renewal date looks like.",
                "No budget: offer the two-week pilot.",
            ],
        }))
    }

    async fn qualify(&self, ctx: &Value) -> CollabResult<Value> {
        // Field-coverage rubric, 2..10. Reachable data is the whole game for
        // a dial list, so sparse records score themselves out.
        let mut score = 2u64;
        let mut missing = Vec::new();
        for (key, points) in [("title", 2u64), ("company", 2), ("email", 2), ("phone", 1), ("state", 1)] {
            if ctx_str(ctx, key).is_some() {
                score += points;
            } else {
                missing.push(key);
            }
        }
        let reason = if missing.is_empty() {
            "full record".to_string()
        } else {
            format!("missing {}", missing.join(", "))
        };
        Ok(json!({ "score": score, "reason": reason }))
    }

    async fn enrich(&self, ctx: &Value) -> CollabResult<Value> {
        let name = ctx_str(ctx, "name").unwrap_or("unknown contact");
        let company = ctx_str(ctx, "company").unwrap_or("unknown company");
        let title = ctx_str(ctx, "title").unwrap_or("unknown role");
        Ok(json!({
            "enriched": true,
            "summary": format!("{name} holds {title} at {company}."),
            "talking_points": [
                format!("Ask how {company} handles call prep today."),
                "Reference the morning prime-window playbook.",
            ],
        }))
    }
}

// ---------------------------------------------------------------------------
// FileBriefs
// ---------------------------------------------------------------------------

/// Campaign briefs are YAML fixtures under `briefs/<id>.yaml`. A brief that
/// is missing or will not parse is fatal: prospecting cannot start blind.
pub struct FileBriefs {
    root: PathBuf,
}

impl FileBriefs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BriefSource for FileBriefs {
    async fn fetch_brief(&self, campaign_id: &str) -> CollabResult<Value> {
        require_slug(campaign_id)?;
        let path = paths::brief_path(&self.root, campaign_id);
        let raw = read_fixture(&path, &format!("brief '{campaign_id}'"))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| CollabError::fatal(format!("malformed brief {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// FileNotifier / FileSequencer
// ---------------------------------------------------------------------------

/// Appends each message as a JSON line to `outbox.jsonl`.
pub struct FileNotifier {
    root: PathBuf,
}

impl FileNotifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn post(&self, channel: &str, message: &str) -> CollabResult<()> {
        let line = json!({
            "channel": channel,
            "message": message,
            "posted_at": Utc::now(),
        });
        crate::io::append_line(&paths::outbox_path(&self.root), &line.to_string())
            .map_err(|e| CollabError::transient(format!("appending to outbox: {e}")))
    }
}

/// Records sequencing actions as JSON lines in `enrollments.jsonl`.
pub struct FileSequencer {
    root: PathBuf,
}

impl FileSequencer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn append(&self, record: Value) -> CollabResult<()> {
        crate::io::append_line(&paths::enrollments_path(&self.root), &record.to_string())
            .map_err(|e| CollabError::transient(format!("appending enrollment: {e}")))
    }
}

#[async_trait]
impl Sequencer for FileSequencer {
    async fn enroll(&self, contact_id: &str, sequence_id: &str) -> CollabResult<()> {
        self.append(json!({
            "action": "enroll",
            "contact_id": contact_id,
            "sequence_id": sequence_id,
            "at": Utc::now(),
        }))
    }

    async fn advance(&self, contact_id: &str) -> CollabResult<()> {
        self.append(json!({
            "action": "advance",
            "contact_id": contact_id,
            "at": Utc::now(),
        }))
    }

    async fn remove(&self, contact_id: &str) -> CollabResult<()> {
        self.append(json!({
            "action": "remove",
            "contact_id": contact_id,
            "at": Utc::now(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
