use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::paths;
use crate::session::Session;
use crate::types::SessionKind;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Dual-layer session persistence: a volatile in-process map for the active
/// read/write path plus a durable JSON snapshot per session.
///
/// Locking is two-level. The outer map lock guards slot lookup and the
/// conflict check on create; each slot carries its own lock serializing
/// read-modify-write cycles (snapshot flush included) for that one session.
/// Updates to different sessions never contend. No lock is ever held across
/// a collaborator call; callers read state, go to the network, then update.
pub struct SessionStore {
    root: PathBuf,
    staleness: chrono::Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Open the store and reconcile the durable layer into the volatile one.
    /// Disk-only sessions are rehydrated; active sessions idle past the
    /// staleness threshold are marked aborted instead of silently resumed;
    /// unreadable snapshots are quarantined to `<id>.json.corrupt`.
    pub fn open(root: &Path, cfg: &Config) -> Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
            staleness: cfg.session.staleness(),
            slots: Mutex::new(HashMap::new()),
        };
        crate::io::ensure_dir(&paths::sessions_dir(root))?;
        store.reconcile()?;
        Ok(store)
    }

    fn reconcile(&self) -> Result<()> {
        let dir = paths::sessions_dir(&self.root);
        let mut slots = self.slots.lock().expect("session map lock poisoned");
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match Session::load(&self.root, &id) {
                Ok(mut session) => {
                    if session.is_stale(self.staleness, Utc::now()) {
                        warn!(id = %id, "session idle past staleness threshold, marking aborted");
                        session.mark_aborted("staleness threshold exceeded on reconcile");
                        session.save(&self.root)?;
                    } else {
                        info!(id = %id, status = %session.status, "rehydrated session");
                    }
                    slots.insert(id, Arc::new(Mutex::new(session)));
                }
                Err(EngineError::CorruptSnapshot { id, reason }) => {
                    warn!(id = %id, reason = %reason, "quarantining corrupt session snapshot");
                    std::fs::rename(
                        paths::session_path(&self.root, &id),
                        paths::corrupt_session_path(&self.root, &id),
                    )?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------
    // CRUD
    // ---------------------------------------------------------------------------

    /// Create a session. Fails with `SessionConflict` while another session
    /// is running or awaiting QA for the same resource key; the check and the
    /// slot insert happen inside one lock window.
    pub fn create(&self, kind: SessionKind, resource_key: &str) -> Result<Session> {
        let session = Session::new(kind, resource_key);
        let slot = {
            let mut slots = self.slots.lock().expect("session map lock poisoned");
            for other in slots.values() {
                let other = other.lock().expect("session lock poisoned");
                if other.resource_key == resource_key && other.status.is_active() {
                    return Err(EngineError::SessionConflict {
                        resource_key: resource_key.to_string(),
                        existing_id: other.id.clone(),
                    });
                }
            }
            let slot = Arc::new(Mutex::new(session.clone()));
            slots.insert(session.id.clone(), slot.clone());
            slot
        };
        // Flush outside the map lock; the slot is already claimed.
        let flushed = {
            let guard = slot.lock().expect("session lock poisoned");
            guard.save(&self.root)
        };
        if let Err(e) = flushed {
            // A session that never reached disk must not hold the resource
            // key; release the slot before surfacing the error.
            let mut slots = self.slots.lock().expect("session map lock poisoned");
            slots.remove(&session.id);
            return Err(e);
        }
        info!(id = %session.id, kind = %kind, key = %resource_key, "created session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Session> {
        let slot = self.slot(id)?;
        let session = slot.lock().expect("session lock poisoned");
        Ok(session.clone())
    }

    /// Atomic read-modify-write. The mutator runs against a draft under the
    /// session's lock; the draft is flushed and swapped in before the lock
    /// is released. A mutator or flush error leaves memory and disk on the
    /// old state, and a concurrent reader never observes a state that did
    /// not reach disk.
    pub fn update<R>(&self, id: &str, mutate: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let slot = self.slot(id)?;
        let mut session = slot.lock().expect("session lock poisoned");
        let mut draft = session.clone();
        let out = mutate(&mut draft)?;
        draft.updated_at = Utc::now();
        draft.save(&self.root)?;
        *session = draft;
        Ok(out)
    }

    pub fn list(&self) -> Vec<Session> {
        let slots = self.slots.lock().expect("session map lock poisoned");
        let mut sessions: Vec<Session> = slots
            .values()
            .map(|s| s.lock().expect("session lock poisoned").clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn list_active(&self) -> Vec<Session> {
        self.list()
            .into_iter()
            .filter(|s| s.status.is_active())
            .collect()
    }

    /// The active session, if any, an operator could re-attach to for this
    /// kind and resource key.
    pub fn find_resumable(&self, kind: SessionKind, resource_key: &str) -> Option<Session> {
        self.list_active()
            .into_iter()
            .find(|s| s.kind == kind && s.resource_key == resource_key)
    }

    // ---------------------------------------------------------------------------
    // Slot lookup
    // ---------------------------------------------------------------------------

    fn slot(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        {
            let slots = self.slots.lock().expect("session map lock poisoned");
            if let Some(slot) = slots.get(id) {
                return Ok(slot.clone());
            }
        }
        // Lazy rehydrate covers sessions snapshotted after open(). The id
        // names a file under sessions/, so it must be a clean slug before
        // any path is built from it.
        paths::validate_slug(id)?;
        if paths::corrupt_session_path(&self.root, id).exists() {
            return Err(EngineError::CorruptSnapshot {
                id: id.to_string(),
                reason: "snapshot was quarantined; session cannot be resumed".to_string(),
            });
        }
        let session = Session::load(&self.root, id)?;
        let mut slots = self.slots.lock().expect("session map lock poisoned");
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(slot.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemStatus, SessionStatus};
    use tempfile::TempDir;

    fn open_store(root: &Path) -> SessionStore {
        SessionStore::open(root, &Config::default()).unwrap()
    }

    #[test]
    fn create_then_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let created = store.create(SessionKind::CallPrep, "list-1").unwrap();
        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.resource_key, "list-1");
        assert!(paths::session_path(dir.path(), &created.id).exists());
    }

    #[test]
    fn conflict_on_same_resource_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let first = store.create(SessionKind::CallPrep, "list-1").unwrap();
        let err = store.create(SessionKind::CallPrep, "list-1").unwrap_err();
        match err {
            EngineError::SessionConflict { existing_id, .. } => {
                assert_eq!(existing_id, first.id)
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn conflict_applies_across_kinds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        store.create(SessionKind::CallPrep, "list-1").unwrap();
        assert!(store.create(SessionKind::Prospecting, "list-1").is_err());
    }

    #[test]
    fn conflict_clears_after_terminal() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let first = store.create(SessionKind::CallPrep, "list-1").unwrap();
        store
            .update(&first.id, |s| {
                s.mark_aborted("operator cancel");
                Ok(())
            })
            .unwrap();
        store.create(SessionKind::CallPrep, "list-1").unwrap();
    }

    #[test]
    fn different_keys_do_not_conflict() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        store.create(SessionKind::CallPrep, "list-1").unwrap();
        store.create(SessionKind::CallPrep, "list-2").unwrap();
    }

    #[test]
    fn update_flushes_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let session = store.create(SessionKind::CallPrep, "list-1").unwrap();
        store
            .update(&session.id, |s| {
                s.campaign = Some("q3-launch".to_string());
                Ok(())
            })
            .unwrap();

        let on_disk = Session::load(dir.path(), &session.id).unwrap();
        assert_eq!(on_disk.campaign.as_deref(), Some("q3-launch"));
    }

    #[test]
    fn update_unknown_session() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let err = store.update("ghost", |_| Ok(())).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[test]
    fn get_rejects_a_traversal_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let err = store.get("../../outside").unwrap_err();
        assert!(matches!(err, EngineError::InvalidSlug(_)));
    }

    #[test]
    fn failed_mutator_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let session = store.create(SessionKind::CallPrep, "list-1").unwrap();

        let result: Result<()> = store.update(&session.id, |s| {
            s.campaign = Some("half-done".to_string());
            Err(EngineError::ItemNotFound("missing".to_string()))
        });
        assert!(result.is_err());

        // Neither the volatile layer nor the snapshot saw the partial write.
        assert_eq!(store.get(&session.id).unwrap().campaign, None);
        let on_disk = Session::load(dir.path(), &session.id).unwrap();
        assert_eq!(on_disk.campaign, None);
    }

    #[test]
    fn failed_initial_flush_releases_the_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        // Turn the sessions directory into a file so the first flush fails.
        std::fs::remove_dir_all(paths::sessions_dir(dir.path())).unwrap();
        std::fs::write(paths::sessions_dir(dir.path()), b"in the way").unwrap();

        let err = store.create(SessionKind::CallPrep, "list-1").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
        // No half-created session survives in memory to squat on the key.
        assert!(store.list().is_empty());
        let err = store.create(SessionKind::CallPrep, "list-1").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)), "ghost held the key: {err:?}");
    }

    #[test]
    fn same_session_updates_serialize() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(dir.path()));
        let session = store.create(SessionKind::CallPrep, "list-1").unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let id = session.id.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    store
                        .update(&id, |s| {
                            s.stats.fetched += 1;
                            Ok(())
                        })
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get(&session.id).unwrap().stats.fetched, 100);
    }

    #[test]
    fn reconcile_rehydrates_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(dir.path());
            let session = store.create(SessionKind::CallPrep, "list-1").unwrap();
            store
                .update(&session.id, |s| {
                    s.items.push(crate::session::Item {
                        external_id: "c-1".to_string(),
                        name: "Ada".to_string(),
                        company: None,
                        title: None,
                        phone: None,
                        state: None,
                        email: None,
                        timezone: None,
                        stage_status: ItemStatus::Generated,
                        payload: Some(serde_json::json!({"script": "hi"})),
                        error: None,
                    });
                    Ok(())
                })
                .unwrap();
        }

        // Fresh store over the same root sees the snapshot.
        let store = open_store(dir.path());
        let sessions = store.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].items.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Running);
    }

    #[test]
    fn reconcile_marks_stale_sessions_aborted() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(dir.path());
            let session = store.create(SessionKind::CallPrep, "list-1").unwrap();
            id = session.id.clone();
        }
        // Age the snapshot past the threshold by hand.
        let mut session = Session::load(dir.path(), &id).unwrap();
        session.updated_at = Utc::now() - chrono::Duration::hours(48);
        session.save(dir.path()).unwrap();

        let store = open_store(dir.path());
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Aborted);
        // And the abort reached disk, not just memory.
        let on_disk = Session::load(dir.path(), &id).unwrap();
        assert_eq!(on_disk.status, SessionStatus::Aborted);
    }

    #[test]
    fn reconcile_quarantines_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        crate::io::atomic_write(
            &paths::session_path(dir.path(), "mangled"),
            b"{ \"id\": \"mangled\", truncated",
        )
        .unwrap();

        let store = open_store(dir.path());
        assert!(store.list().is_empty());
        assert!(!paths::session_path(dir.path(), "mangled").exists());
        assert!(paths::corrupt_session_path(dir.path(), "mangled").exists());

        let err = store.get("mangled").unwrap_err();
        assert!(matches!(err, EngineError::CorruptSnapshot { .. }));
    }

    #[test]
    fn find_resumable_matches_kind_and_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let session = store.create(SessionKind::Prospecting, "segment-9").unwrap();

        let found = store
            .find_resumable(SessionKind::Prospecting, "segment-9")
            .unwrap();
        assert_eq!(found.id, session.id);
        assert!(store
            .find_resumable(SessionKind::CallPrep, "segment-9")
            .is_none());
        assert!(store
            .find_resumable(SessionKind::Prospecting, "segment-1")
            .is_none());
    }

    #[test]
    fn list_sorted_by_creation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let a = store.create(SessionKind::CallPrep, "list-a").unwrap();
        let b = store.create(SessionKind::CallPrep, "list-b").unwrap();
        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
