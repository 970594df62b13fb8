use crate::collab::ContactRecord;
use crate::error::{EngineError, Result};
use crate::paths;
use crate::types::{ItemStatus, SessionKind, SessionStatus, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Payload inspection
// ---------------------------------------------------------------------------

/// The engine's only look inside a payload: is there anything in it at all.
/// Shape is the collaborator's contract, never branched on here.
pub fn payload_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub stage_status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Item {
    pub fn from_record(record: ContactRecord) -> Self {
        Self {
            external_id: record.external_id,
            name: record.name,
            company: record.company,
            title: record.title,
            phone: record.phone,
            state: record.state,
            email: record.email,
            timezone: record.timezone,
            stage_status: ItemStatus::Pending,
            payload: None,
            error: None,
        }
    }

    /// Forward-only along pending -> generated -> (approved|rejected|edited)
    /// -> written; sideways into error from any unwritten state; error goes
    /// back to pending only. Lateral moves inside the QA rank stay open until
    /// the stage pointer moves.
    pub fn can_transition_to(&self, target: ItemStatus) -> Result<()> {
        let invalid = |reason: &str| {
            Err(EngineError::InvalidTransition {
                from: self.stage_status.to_string(),
                to: target.to_string(),
                reason: reason.to_string(),
            })
        };

        if target == ItemStatus::Error {
            if self.stage_status == ItemStatus::Written {
                return invalid("item is already written back");
            }
            return Ok(());
        }

        if self.stage_status == ItemStatus::Error {
            if target == ItemStatus::Pending {
                return Ok(());
            }
            return invalid("an errored item can only be retried back to pending");
        }

        let (Some(from), Some(to)) = (self.stage_status.rank(), target.rank()) else {
            return invalid("unknown rank");
        };
        if to > from {
            return Ok(());
        }
        if to == from && self.stage_status.is_qa_resolution() && target.is_qa_resolution() {
            return Ok(());
        }
        invalid("stage statuses move forward only")
    }

    pub fn set_status(&mut self, target: ItemStatus) -> Result<()> {
        self.can_transition_to(target)?;
        self.stage_status = target;
        // Error detail stays visible through the retry; a real success wipes it.
        if !matches!(target, ItemStatus::Error | ItemStatus::Pending) {
            self.error = None;
        }
        Ok(())
    }

    pub fn mark_error(&mut self, detail: impl Into<String>) -> Result<()> {
        self.set_status(ItemStatus::Error)?;
        self.error = Some(detail.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub fetched: u32,
    pub generated: u32,
    pub written: u32,
    pub skipped: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub resource_key: String,
    pub stage: Stage,
    pub status: SessionStatus,
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calling_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<Value>,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(kind: SessionKind, resource_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            resource_key: resource_key.into(),
            stage: kind.first_stage(),
            status: SessionStatus::Running,
            items: Vec::new(),
            campaign: None,
            calling_date: None,
            sequence: None,
            brief: None,
            stats: SessionStats::default(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    pub fn load(root: &Path, id: &str) -> Result<Self> {
        let path = paths::session_path(root, id);
        if !path.exists() {
            return Err(EngineError::SessionNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data).map_err(|e| EngineError::CorruptSnapshot {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::session_path(root, &self.id);
        let data = serde_json::to_vec_pretty(self)?;
        crate::io::atomic_write(&path, &data)
    }

    // ---------------------------------------------------------------------------
    // Stage pointer
    // ---------------------------------------------------------------------------

    pub fn stage_index(&self) -> usize {
        self.kind
            .stages()
            .iter()
            .position(|s| *s == self.stage)
            .unwrap_or(0)
    }

    pub fn next_stage(&self) -> Option<Stage> {
        self.kind.stages().get(self.stage_index() + 1).copied()
    }

    pub fn is_final_stage(&self) -> bool {
        self.next_stage().is_none()
    }

    /// Move the pointer forward. Survivors restart as pending for the new
    /// stage; rejected, errored and written items are carried along untouched
    /// so the operator can still see them.
    pub fn advance_stage(&mut self) -> Result<Stage> {
        let Some(next) = self.next_stage() else {
            return Err(EngineError::InvalidTransition {
                from: self.stage.to_string(),
                to: "none".to_string(),
                reason: "already at the final stage".to_string(),
            });
        };
        for item in &mut self.items {
            if item.stage_status.survives_stage_advance() {
                item.stage_status = ItemStatus::Pending;
            }
        }
        self.stage = next;
        self.updated_at = Utc::now();
        Ok(next)
    }

    // ---------------------------------------------------------------------------
    // Item access
    // ---------------------------------------------------------------------------

    pub fn item(&self, external_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.external_id == external_id)
    }

    pub fn item_mut(&mut self, external_id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.external_id == external_id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.stage_status == ItemStatus::Pending)
            .map(|i| i.external_id.clone())
            .collect()
    }

    pub fn count_with_status(&self, status: ItemStatus) -> usize {
        self.items
            .iter()
            .filter(|i| i.stage_status == status)
            .count()
    }

    /// The gate holds while any item still awaits a QA resolution. Errored
    /// items count as resolved by exclusion.
    pub fn gate_resolved(&self) -> bool {
        self.count_with_status(ItemStatus::Generated) == 0
    }

    // ---------------------------------------------------------------------------
    // QA operations
    // ---------------------------------------------------------------------------

    /// Approve the given items, or every generated item when `ids` is None.
    /// Returns the ids actually approved.
    pub fn approve_items(&mut self, ids: Option<&[String]>) -> Result<Vec<String>> {
        let targets = self.qa_targets(ids)?;
        for id in &targets {
            let item = self.item_mut(id).ok_or_else(|| {
                EngineError::ItemNotFound(id.clone())
            })?;
            item.set_status(ItemStatus::Approved)?;
        }
        self.updated_at = Utc::now();
        Ok(targets)
    }

    pub fn reject_items(&mut self, ids: &[String], reason: Option<&str>) -> Result<()> {
        for id in ids {
            let item = self
                .item_mut(id)
                .ok_or_else(|| EngineError::ItemNotFound(id.clone()))?;
            Self::require_qa_eligible(item, ItemStatus::Rejected)?;
            item.set_status(ItemStatus::Rejected)?;
            if let Some(reason) = reason {
                item.error = Some(reason.to_string());
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn edit_item(&mut self, id: &str, payload: Value) -> Result<()> {
        if payload_is_empty(&payload) {
            return Err(EngineError::EmptyPayload(id.to_string()));
        }
        let item = self
            .item_mut(id)
            .ok_or_else(|| EngineError::ItemNotFound(id.to_string()))?;
        Self::require_qa_eligible(item, ItemStatus::Edited)?;
        item.set_status(ItemStatus::Edited)?;
        item.payload = Some(payload);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// error -> pending for the current stage only. The old error detail is
    /// kept on the item until reprocessing succeeds.
    pub fn retry_items(&mut self, ids: &[String]) -> Result<()> {
        for id in ids {
            let item = self
                .item_mut(id)
                .ok_or_else(|| EngineError::ItemNotFound(id.clone()))?;
            item.set_status(ItemStatus::Pending)?;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn qa_targets(&self, ids: Option<&[String]>) -> Result<Vec<String>> {
        match ids {
            Some(ids) => {
                for id in ids {
                    let item = self
                        .item(id)
                        .ok_or_else(|| EngineError::ItemNotFound(id.clone()))?;
                    Self::require_qa_eligible(item, ItemStatus::Approved)?;
                }
                Ok(ids.to_vec())
            }
            None => Ok(self
                .items
                .iter()
                .filter(|i| i.stage_status == ItemStatus::Generated)
                .map(|i| i.external_id.clone())
                .collect()),
        }
    }

    // QA resolutions apply to reviewed content only; a pending or errored
    // item has nothing to approve.
    fn require_qa_eligible(item: &Item, target: ItemStatus) -> Result<()> {
        let s = item.stage_status;
        if s == ItemStatus::Generated || s.is_qa_resolution() {
            return Ok(());
        }
        Err(EngineError::InvalidTransition {
            from: s.to_string(),
            to: target.to_string(),
            reason: "item has not been generated for this stage".to_string(),
        })
    }

    // ---------------------------------------------------------------------------
    // Lifecycle helpers
    // ---------------------------------------------------------------------------

    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status.is_active() && now - self.updated_at > threshold
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Aborted;
        self.failure = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.failure = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// `generated` counts every item that has produced content, written ones
    /// included, so the counters stay monotone across stage advances.
    pub fn recount_stats(&mut self) {
        let mut stats = SessionStats {
            fetched: self.items.len() as u32,
            ..SessionStats::default()
        };
        for item in &self.items {
            match item.stage_status {
                ItemStatus::Generated | ItemStatus::Approved | ItemStatus::Edited => {
                    stats.generated += 1
                }
                ItemStatus::Written => {
                    stats.generated += 1;
                    stats.written += 1;
                }
                ItemStatus::Rejected => stats.skipped += 1,
                ItemStatus::Error => stats.failed += 1,
                ItemStatus::Pending => {}
            }
        }
        self.stats = stats;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(id: &str, status: ItemStatus) -> Item {
        Item {
            external_id: id.to_string(),
            name: format!("Contact {id}"),
            company: None,
            title: None,
            phone: None,
            state: None,
            email: None,
            timezone: None,
            stage_status: status,
            payload: Some(json!({"script": "hello"})),
            error: None,
        }
    }

    #[test]
    fn new_session_starts_at_first_stage() {
        let s = Session::new(SessionKind::CallPrep, "list-1");
        assert_eq!(s.stage, Stage::Fetch);
        assert_eq!(s.status, SessionStatus::Running);
        assert!(s.items.is_empty());
        assert_eq!(s.id.len(), 32);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("c-1", ItemStatus::Generated));
        s.save(dir.path()).unwrap();

        let loaded = Session::load(dir.path(), &s.id).unwrap();
        assert_eq!(loaded.resource_key, "list-1");
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].stage_status, ItemStatus::Generated);
    }

    #[test]
    fn load_missing_session() {
        let dir = TempDir::new().unwrap();
        let err = Session::load(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[test]
    fn load_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = paths::session_path(dir.path(), "bad");
        crate::io::atomic_write(&path, b"{ not json").unwrap();
        let err = Session::load(dir.path(), "bad").unwrap_err();
        assert!(matches!(err, EngineError::CorruptSnapshot { .. }));
    }

    #[test]
    fn item_forward_transitions() {
        let mut i = item("c-1", ItemStatus::Pending);
        i.set_status(ItemStatus::Generated).unwrap();
        i.set_status(ItemStatus::Approved).unwrap();
        i.set_status(ItemStatus::Written).unwrap();
    }

    #[test]
    fn item_backward_transition_rejected() {
        let mut i = item("c-1", ItemStatus::Written);
        let err = i.set_status(ItemStatus::Pending).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn item_qa_lateral_moves() {
        let mut i = item("c-1", ItemStatus::Approved);
        i.set_status(ItemStatus::Rejected).unwrap();
        i.set_status(ItemStatus::Edited).unwrap();
        i.set_status(ItemStatus::Approved).unwrap();
    }

    #[test]
    fn item_error_retry_cycle() {
        let mut i = item("c-1", ItemStatus::Pending);
        i.mark_error("rate limited after 3 attempts").unwrap();
        assert_eq!(i.stage_status, ItemStatus::Error);
        assert!(i.error.is_some());

        // retry keeps the detail until the item actually succeeds
        i.set_status(ItemStatus::Pending).unwrap();
        assert!(i.error.is_some());
        i.set_status(ItemStatus::Generated).unwrap();
        assert!(i.error.is_none());
    }

    #[test]
    fn errored_item_only_retries_to_pending() {
        let mut i = item("c-1", ItemStatus::Error);
        assert!(i.set_status(ItemStatus::Written).is_err());
        assert!(i.set_status(ItemStatus::Approved).is_err());
        i.set_status(ItemStatus::Pending).unwrap();
    }

    #[test]
    fn written_item_cannot_error() {
        let mut i = item("c-1", ItemStatus::Written);
        assert!(i.mark_error("late failure").is_err());
    }

    #[test]
    fn advance_resets_survivors() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.stage = Stage::Review;
        s.items.push(item("a", ItemStatus::Approved));
        s.items.push(item("b", ItemStatus::Edited));
        s.items.push(item("c", ItemStatus::Rejected));
        s.items.push(item("d", ItemStatus::Error));

        let next = s.advance_stage().unwrap();
        assert_eq!(next, Stage::Write);
        assert_eq!(s.items[0].stage_status, ItemStatus::Pending);
        assert_eq!(s.items[1].stage_status, ItemStatus::Pending);
        assert_eq!(s.items[2].stage_status, ItemStatus::Rejected);
        assert_eq!(s.items[3].stage_status, ItemStatus::Error);
    }

    #[test]
    fn advance_past_final_stage_fails() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.stage = Stage::Notify;
        assert!(s.advance_stage().is_err());
    }

    #[test]
    fn approve_all_generated() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.stage = Stage::Review;
        s.items.push(item("a", ItemStatus::Generated));
        s.items.push(item("b", ItemStatus::Generated));
        s.items.push(item("c", ItemStatus::Error));

        let approved = s.approve_items(None).unwrap();
        assert_eq!(approved, vec!["a".to_string(), "b".to_string()]);
        assert!(s.gate_resolved());
    }

    #[test]
    fn approve_pending_item_rejected() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Pending));
        let ids = vec!["a".to_string()];
        assert!(s.approve_items(Some(&ids)).is_err());
    }

    #[test]
    fn reject_records_reason() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Generated));
        s.reject_items(&["a".to_string()], Some("tone is off"))
            .unwrap();
        assert_eq!(s.items[0].stage_status, ItemStatus::Rejected);
        assert_eq!(s.items[0].error.as_deref(), Some("tone is off"));
    }

    #[test]
    fn edit_replaces_payload() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Generated));
        s.edit_item("a", json!({"script": "rewritten"})).unwrap();
        assert_eq!(s.items[0].stage_status, ItemStatus::Edited);
        assert_eq!(s.items[0].payload, Some(json!({"script": "rewritten"})));
    }

    #[test]
    fn edit_empty_payload_rejected() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Generated));
        let err = s.edit_item("a", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::EmptyPayload(_)));
    }

    #[test]
    fn retry_non_errored_item_fails() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Generated));
        assert!(s.retry_items(&["a".to_string()]).is_err());
    }

    #[test]
    fn unknown_item_id() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        let err = s.retry_items(&["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::ItemNotFound(_)));
    }

    #[test]
    fn staleness_only_for_active_sessions() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.updated_at = Utc::now() - chrono::Duration::hours(24);
        assert!(s.is_stale(chrono::Duration::hours(12), Utc::now()));

        s.status = SessionStatus::Completed;
        assert!(!s.is_stale(chrono::Duration::hours(12), Utc::now()));
    }

    #[test]
    fn stats_recount() {
        let mut s = Session::new(SessionKind::CallPrep, "list-1");
        s.items.push(item("a", ItemStatus::Written));
        s.items.push(item("b", ItemStatus::Generated));
        s.items.push(item("c", ItemStatus::Rejected));
        s.items.push(item("d", ItemStatus::Error));
        s.recount_stats();
        assert_eq!(s.stats.fetched, 4);
        assert_eq!(s.stats.written, 1);
        // The written item counts as generated too.
        assert_eq!(s.stats.generated, 2);
        assert_eq!(s.stats.skipped, 1);
        assert_eq!(s.stats.failed, 1);
    }

    #[test]
    fn payload_emptiness() {
        assert!(payload_is_empty(&Value::Null));
        assert!(payload_is_empty(&json!("")));
        assert!(payload_is_empty(&json!("   ")));
        assert!(payload_is_empty(&json!({})));
        assert!(payload_is_empty(&json!([])));
        assert!(!payload_is_empty(&json!("script")));
        assert!(!payload_is_empty(&json!({"score": 9})));
        assert!(!payload_is_empty(&json!(0)));
    }
}
