use crate::callsheet::{self, Zone};
use crate::collab::Collaborators;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::paths;
use crate::progress::ProgressHub;
use crate::retry::RetryPolicy;
use crate::session::{payload_is_empty, Item, Session};
use crate::store::SessionStore;
use crate::types::{EventType, ItemStatus, SessionKind, SessionStatus, Stage};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives sessions through their pipeline stages. Every collaborator call is
/// retry-wrapped and runs outside any session lock; state changes go through
/// the store's serialized update path and are mirrored on the progress hub.
pub struct Engine {
    store: Arc<SessionStore>,
    hub: Arc<ProgressHub>,
    retry: RetryPolicy,
    collab: Collaborators,
    config: Config,
    advance_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Operator-provided metadata at session start.
#[derive(Debug, Clone, Default)]
pub struct StartMeta {
    pub campaign: Option<String>,
    pub calling_date: Option<String>,
    pub sequence: Option<String>,
}

/// What one item's stage operation produced.
enum ItemOutcome {
    Generated(Value),
    AutoRejected { payload: Value, reason: String },
    Written,
    Failed(String),
}

impl Engine {
    pub fn new(
        store: Arc<SessionStore>,
        hub: Arc<ProgressHub>,
        collab: Collaborators,
        config: Config,
    ) -> Self {
        Self {
            store,
            hub,
            retry: RetryPolicy::from_config(&config.retry),
            collab,
            config,
            advance_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub fn collab(&self) -> &Collaborators {
        &self.collab
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---------------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------------

    /// One lock per session id, created on first use. Holding it across the
    /// whole advance loop makes resume single-flight for a session while
    /// unrelated sessions run freely.
    fn advance_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.advance_locks.lock().expect("advance lock map poisoned");
        locks.entry(id.to_string()).or_default().clone()
    }

    /// A session idle past the staleness threshold cannot be resumed: evict
    /// it the same way reconcile would, then surface `StaleSession` so the
    /// operator starts over.
    fn abort_if_stale(&self, id: &str) -> Result<()> {
        let threshold = self.config.session.staleness();
        if !self.store.get(id)?.is_stale(threshold, Utc::now()) {
            return Ok(());
        }
        // Re-check under the slot lock; a concurrent caller may have beaten
        // us to the eviction.
        let evicted = self.store.update(id, |s| {
            if s.is_stale(threshold, Utc::now()) {
                s.mark_aborted("staleness threshold exceeded on resume");
                return Ok(true);
            }
            Ok(false)
        })?;
        if evicted {
            let session = self.store.get(id)?;
            self.hub.emit(
                id,
                session.stage,
                None,
                EventType::SessionAborted,
                json!({ "reason": "staleness threshold exceeded" }),
            );
            warn!(id = %id, "session idle past staleness threshold, aborted on resume");
        }
        Err(EngineError::StaleSession(id.to_string()))
    }

    /// Create a session. Prospecting reads its campaign brief exactly once
    /// here; a brief that cannot be fetched fails the session immediately.
    pub async fn start(
        &self,
        kind: SessionKind,
        resource_key: &str,
        meta: StartMeta,
    ) -> Result<Session> {
        paths::validate_slug(resource_key)?;
        if kind == SessionKind::Prospecting {
            // The campaign doubles as the brief file name for prospecting;
            // for call prep it is free-form label text.
            if let Some(campaign) = meta.campaign.as_deref() {
                paths::validate_slug(campaign)?;
            }
        }
        let created = self.store.create(kind, resource_key)?;
        let id = created.id.clone();
        self.store.update(&id, |s| {
            s.campaign = meta.campaign.clone();
            s.calling_date = meta.calling_date.clone();
            s.sequence = meta.sequence.clone();
            Ok(())
        })?;

        if kind == SessionKind::Prospecting {
            let campaign_id = meta
                .campaign
                .clone()
                .unwrap_or_else(|| resource_key.to_string());
            let briefs = self.collab.briefs.clone();
            let fetched = self
                .retry
                .execute("fetch_brief", || {
                    let briefs = briefs.clone();
                    let campaign_id = campaign_id.clone();
                    async move { briefs.fetch_brief(&campaign_id).await }
                })
                .await;
            match fetched {
                Ok(brief) => {
                    self.store.update(&id, |s| {
                        s.brief = Some(brief);
                        Ok(())
                    })?;
                }
                Err(err) => {
                    let reason = format!("brief fetch failed: {err}");
                    let failed = self.store.update(&id, |s| {
                        if s.status == SessionStatus::Running {
                            s.mark_failed(reason.clone());
                            return Ok(true);
                        }
                        Ok(false)
                    })?;
                    if failed {
                        self.hub.emit(
                            &id,
                            created.stage,
                            None,
                            EventType::SessionFailed,
                            json!({ "error": reason }),
                        );
                    }
                    return Err(err.into());
                }
            }
        }

        info!(id = %id, kind = %kind, key = %resource_key, "session started");
        self.store.get(&id)
    }

    /// Run the pipeline forward until a gate, a terminal state, or an abort.
    /// Idempotent: only `pending` items are processed, so re-invoking after
    /// a crash picks up exactly where the snapshot left off.
    pub async fn advance(&self, id: &str) -> Result<Session> {
        // A concurrent advance on the same session waits here, then finds
        // the winner's end state at the top of the loop and returns without
        // redoing any stage work.
        let lock = self.advance_lock(id);
        let _running = lock.lock().await;
        self.abort_if_stale(id)?;
        loop {
            let session = self.store.get(id)?;
            if session.status != SessionStatus::Running {
                // Gates hold for the operator; terminals hold for good.
                return Ok(session);
            }
            let stage = session.stage;
            self.hub.emit(
                id,
                stage,
                None,
                EventType::StageStarted,
                json!({ "pending": session.count_with_status(ItemStatus::Pending) }),
            );
            info!(id = %id, stage = %stage, "stage started");

            if stage.is_fetch() {
                self.run_fetch(&session).await?;
            } else if stage == Stage::Notify {
                self.run_notify(&session).await;
            } else {
                self.run_item_stage(&session).await?;
            }

            let session = self.store.update(id, |s| {
                s.recount_stats();
                Ok(s.clone())
            })?;
            if session.status == SessionStatus::Aborted {
                return Ok(session);
            }
            self.hub.emit(
                id,
                stage,
                None,
                EventType::StageCompleted,
                json!(session.stats),
            );

            if stage.is_gate() && !session.gate_resolved() {
                let held = self.store.update(id, |s| {
                    // An abort that landed mid-stage wins; never resurrect.
                    if s.status == SessionStatus::Running {
                        s.status = SessionStatus::AwaitingQa;
                    }
                    Ok(s.clone())
                })?;
                if held.status != SessionStatus::AwaitingQa {
                    return Ok(held);
                }
                self.hub.emit(
                    id,
                    stage,
                    None,
                    EventType::AwaitingQa,
                    json!({ "generated": held.count_with_status(ItemStatus::Generated) }),
                );
                info!(id = %id, stage = %stage, "session awaiting qa");
                return Ok(held);
            }

            if session.is_final_stage() {
                let done = self.store.update(id, |s| {
                    if s.status == SessionStatus::Running {
                        s.status = SessionStatus::Completed;
                    }
                    Ok(s.clone())
                })?;
                if done.status != SessionStatus::Completed {
                    return Ok(done);
                }
                self.hub
                    .emit(id, stage, None, EventType::SessionCompleted, json!(done.stats));
                info!(id = %id, "session completed");
                return Ok(done);
            }

            let moved = self.store.update(id, |s| {
                if s.status != SessionStatus::Running {
                    return Ok(false);
                }
                s.advance_stage()?;
                Ok(true)
            })?;
            if !moved {
                return self.store.get(id);
            }
        }
    }

    pub fn approve(&self, id: &str, item_ids: Option<&[String]>) -> Result<Session> {
        self.abort_if_stale(id)?;
        let approved = self.store.update(id, |s| {
            require_awaiting_qa(s)?;
            let ids = s.approve_items(item_ids)?;
            if s.gate_resolved() {
                s.status = SessionStatus::Running;
            }
            Ok(ids)
        })?;
        let session = self.store.get(id)?;
        for ext in &approved {
            self.hub.emit(
                id,
                session.stage,
                Some(ext.as_str()),
                EventType::ItemCompleted,
                json!({ "status": "approved" }),
            );
        }
        info!(id = %id, count = approved.len(), "items approved");
        Ok(session)
    }

    pub fn reject(&self, id: &str, item_ids: &[String], reason: Option<&str>) -> Result<Session> {
        self.abort_if_stale(id)?;
        self.store.update(id, |s| {
            require_awaiting_qa(s)?;
            s.reject_items(item_ids, reason)?;
            if s.gate_resolved() {
                s.status = SessionStatus::Running;
            }
            Ok(())
        })?;
        let session = self.store.get(id)?;
        for ext in item_ids {
            self.hub.emit(
                id,
                session.stage,
                Some(ext.as_str()),
                EventType::ItemSkipped,
                json!({ "reason": reason.unwrap_or("rejected") }),
            );
        }
        info!(id = %id, count = item_ids.len(), "items rejected");
        Ok(session)
    }

    pub fn edit(&self, id: &str, item_id: &str, payload: Value) -> Result<Session> {
        self.abort_if_stale(id)?;
        self.store.update(id, |s| {
            require_awaiting_qa(s)?;
            s.edit_item(item_id, payload)?;
            if s.gate_resolved() {
                s.status = SessionStatus::Running;
            }
            Ok(())
        })?;
        let session = self.store.get(id)?;
        self.hub.emit(
            id,
            session.stage,
            Some(item_id),
            EventType::ItemCompleted,
            json!({ "status": "edited" }),
        );
        Ok(session)
    }

    /// error -> pending for the current stage. Works both mid-run and at a
    /// gate, so an operator can requeue failures before resolving QA.
    pub fn retry_items(&self, id: &str, item_ids: &[String]) -> Result<Session> {
        self.abort_if_stale(id)?;
        self.store.update(id, |s| {
            if s.status.is_terminal() {
                return Err(EngineError::NotRunnable {
                    id: s.id.clone(),
                    status: s.status.to_string(),
                    reason: "terminal sessions cannot retry items".to_string(),
                });
            }
            s.retry_items(item_ids)
        })?;
        let session = self.store.get(id)?;
        for ext in item_ids {
            self.hub.emit(
                id,
                session.stage,
                Some(ext.as_str()),
                EventType::ItemCompleted,
                json!({ "status": "pending" }),
            );
        }
        Ok(session)
    }

    pub fn abort(&self, id: &str) -> Result<Session> {
        let session = self.store.update(id, |s| {
            if !s.status.is_active() {
                return Err(EngineError::NotRunnable {
                    id: s.id.clone(),
                    status: s.status.to_string(),
                    reason: "only active sessions can be aborted".to_string(),
                });
            }
            s.mark_aborted("operator abort");
            Ok(s.clone())
        })?;
        self.hub.emit(
            id,
            session.stage,
            None,
            EventType::SessionAborted,
            json!({ "reason": "operator abort" }),
        );
        info!(id = %id, "session aborted");
        Ok(session)
    }

    // ---------------------------------------------------------------------------
    // Stage execution
    // ---------------------------------------------------------------------------

    /// Populate items from the CRM, once. A session resumed with items
    /// already present skips the fetch entirely.
    async fn run_fetch(&self, session: &Session) -> Result<()> {
        if !session.items.is_empty() {
            info!(id = %session.id, "items already fetched, skipping");
            return Ok(());
        }
        let key = session.resource_key.clone();
        let crm = self.collab.crm.clone();
        let fetched = self
            .retry
            .execute("fetch_items", || {
                let crm = crm.clone();
                let key = key.clone();
                async move { crm.fetch_items(&key).await }
            })
            .await;
        match fetched {
            Ok(records) => {
                let count = records.len();
                self.store.update(&session.id, |s| {
                    s.items = records.into_iter().map(Item::from_record).collect();
                    s.recount_stats();
                    Ok(())
                })?;
                info!(id = %session.id, count, "fetched items");
                Ok(())
            }
            Err(err) => {
                // No items exist yet, so there is nothing to isolate: the
                // failure is session-scoped.
                let reason = format!("{} failed: {err}", session.stage);
                let failed = self.store.update(&session.id, |s| {
                    if s.status == SessionStatus::Running {
                        s.mark_failed(reason.clone());
                        return Ok(true);
                    }
                    Ok(false)
                })?;
                if failed {
                    self.hub.emit(
                        &session.id,
                        session.stage,
                        None,
                        EventType::SessionFailed,
                        json!({ "error": reason }),
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Process every pending item through the stage's collaborator
    /// operation, `parallelism` at a time. Failures are isolated per item;
    /// an abort stops new work from being scheduled while started calls
    /// drain.
    async fn run_item_stage(&self, session: &Session) -> Result<()> {
        let id = session.id.as_str();
        let stage = session.stage;
        let pending: Vec<Item> = session
            .items
            .iter()
            .filter(|i| i.stage_status == ItemStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let parallelism = self.config.session.parallelism.max(1);

        let mut completions = stream::iter(pending.into_iter().map(|item| async move {
            let aborted = matches!(
                self.store.get(id),
                Ok(s) if s.status == SessionStatus::Aborted
            );
            if aborted {
                return None;
            }
            let external_id = item.external_id.clone();
            let outcome = self.execute_item(stage, session, &item).await;
            Some((external_id, outcome))
        }))
        .buffer_unordered(parallelism);

        while let Some(completion) = completions.next().await {
            let Some((external_id, outcome)) = completion else {
                continue;
            };
            self.apply_outcome(id, stage, &external_id, outcome)?;
        }
        Ok(())
    }

    async fn execute_item(&self, stage: Stage, session: &Session, item: &Item) -> ItemOutcome {
        match stage {
            Stage::Generate => self.generate_item(session, item).await,
            Stage::Qualify => self.qualify_item(session, item).await,
            Stage::EnrichCompany | Stage::EnrichPerson => self.enrich_item(session, item).await,
            Stage::Review => review_item(item),
            Stage::Write | Stage::Export => self.write_item(item).await,
            Stage::Fetch | Stage::Discover | Stage::Notify => {
                unreachable!("stage without per-item operations is dispatched in advance")
            }
        }
    }

    /// Pull outbound email context, then ask the content collaborator for a
    /// script payload.
    async fn generate_item(&self, session: &Session, item: &Item) -> ItemOutcome {
        let crm = self.collab.crm.clone();
        let contact = item.external_id.clone();
        let email = match self
            .retry
            .execute("fetch_last_outbound_email", || {
                let crm = crm.clone();
                let contact = contact.clone();
                async move { crm.fetch_last_outbound_email(&contact).await }
            })
            .await
        {
            Ok(email) => email,
            Err(err) => return ItemOutcome::Failed(err.to_string()),
        };

        let ctx = item_context(item, session.brief.as_ref(), email.as_deref());
        let ai = self.collab.ai.clone();
        match self
            .retry
            .execute("generate", || {
                let ai = ai.clone();
                let ctx = ctx.clone();
                async move { ai.generate(&ctx).await }
            })
            .await
        {
            Ok(payload) => ItemOutcome::Generated(payload),
            Err(err) => ItemOutcome::Failed(err.to_string()),
        }
    }

    /// Score the item; anything under the configured minimum is disqualified
    /// on the spot with the score kept for the operator to see.
    async fn qualify_item(&self, session: &Session, item: &Item) -> ItemOutcome {
        let ctx = item_context(item, session.brief.as_ref(), None);
        let ai = self.collab.ai.clone();
        let scored = match self
            .retry
            .execute("qualify", || {
                let ai = ai.clone();
                let ctx = ctx.clone();
                async move { ai.qualify(&ctx).await }
            })
            .await
        {
            Ok(scored) => scored,
            Err(err) => return ItemOutcome::Failed(err.to_string()),
        };

        let Some(score) = scored.get("score").and_then(Value::as_u64) else {
            return ItemOutcome::Failed("qualify result has no score".to_string());
        };
        let minimum = u64::from(self.config.qualify.min_score);
        if score < minimum {
            return ItemOutcome::AutoRejected {
                payload: scored,
                reason: format!("score {score} below minimum {minimum}"),
            };
        }
        ItemOutcome::Generated(scored)
    }

    async fn enrich_item(&self, session: &Session, item: &Item) -> ItemOutcome {
        let ctx = item_context(item, session.brief.as_ref(), None);
        let ai = self.collab.ai.clone();
        match self
            .retry
            .execute("enrich", || {
                let ai = ai.clone();
                let ctx = ctx.clone();
                async move { ai.enrich(&ctx).await }
            })
            .await
        {
            Ok(enriched) => ItemOutcome::Generated(merge_payload(item.payload.as_ref(), enriched)),
            Err(err) => ItemOutcome::Failed(err.to_string()),
        }
    }

    async fn write_item(&self, item: &Item) -> ItemOutcome {
        let html = render_note(item);
        let crm = self.collab.crm.clone();
        let contact = item.external_id.clone();
        match self
            .retry
            .execute("write_note", || {
                let crm = crm.clone();
                let contact = contact.clone();
                let html = html.clone();
                async move { crm.write_note(&contact, &html).await }
            })
            .await
        {
            Ok(()) => ItemOutcome::Written,
            Err(err) => ItemOutcome::Failed(err.to_string()),
        }
    }

    /// Best-effort dial-plan post. A notify failure degrades to a warning
    /// event; it never blocks completion.
    async fn run_notify(&self, session: &Session) {
        let zone = Zone::from_str(&self.config.operator.timezone).unwrap_or(Zone::Pacific);
        // Host clock stands in for the operator's wall clock; interactive
        // call-sheet rendering takes an explicit override instead.
        let sheet = callsheet::build(session, zone, chrono::Local::now().time());
        let summary = callsheet::render_summary(session, &sheet);
        let channel = self.config.operator.channel.clone();
        let notifier = self.collab.notifier.clone();
        let posted = self
            .retry
            .execute("notify", || {
                let notifier = notifier.clone();
                let channel = channel.clone();
                let summary = summary.clone();
                async move { notifier.post(&channel, &summary).await }
            })
            .await;
        if let Err(err) = posted {
            warn!(id = %session.id, error = %err, "notify failed, continuing");
            self.hub.emit(
                &session.id,
                Stage::Notify,
                None,
                EventType::Warning,
                json!({ "message": format!("notify failed: {err}") }),
            );
        }
    }

    fn apply_outcome(
        &self,
        id: &str,
        stage: Stage,
        external_id: &str,
        outcome: ItemOutcome,
    ) -> Result<()> {
        match outcome {
            ItemOutcome::Generated(payload) => {
                self.store.update(id, |s| {
                    let item = s
                        .item_mut(external_id)
                        .ok_or_else(|| EngineError::ItemNotFound(external_id.to_string()))?;
                    item.set_status(ItemStatus::Generated)?;
                    item.payload = Some(payload);
                    Ok(())
                })?;
                self.hub.emit(
                    id,
                    stage,
                    Some(external_id),
                    EventType::ItemCompleted,
                    json!({ "status": "generated" }),
                );
            }
            ItemOutcome::AutoRejected { payload, reason } => {
                self.store.update(id, |s| {
                    let item = s
                        .item_mut(external_id)
                        .ok_or_else(|| EngineError::ItemNotFound(external_id.to_string()))?;
                    item.set_status(ItemStatus::Rejected)?;
                    item.payload = Some(payload);
                    item.error = Some(reason.clone());
                    Ok(())
                })?;
                self.hub.emit(
                    id,
                    stage,
                    Some(external_id),
                    EventType::ItemSkipped,
                    json!({ "reason": reason }),
                );
            }
            ItemOutcome::Written => {
                self.store.update(id, |s| {
                    let item = s
                        .item_mut(external_id)
                        .ok_or_else(|| EngineError::ItemNotFound(external_id.to_string()))?;
                    item.set_status(ItemStatus::Written)?;
                    Ok(())
                })?;
                self.hub.emit(
                    id,
                    stage,
                    Some(external_id),
                    EventType::ItemCompleted,
                    json!({ "status": "written" }),
                );
            }
            ItemOutcome::Failed(message) => {
                warn!(id = %id, item = %external_id, error = %message, "item failed");
                self.store.update(id, |s| {
                    let item = s
                        .item_mut(external_id)
                        .ok_or_else(|| EngineError::ItemNotFound(external_id.to_string()))?;
                    item.mark_error(message.clone())
                })?;
                self.hub.emit(
                    id,
                    stage,
                    Some(external_id),
                    EventType::ItemFailed,
                    json!({ "error": message }),
                );
            }
        }
        Ok(())
    }
}

fn require_awaiting_qa(session: &Session) -> Result<()> {
    if session.status == SessionStatus::AwaitingQa {
        return Ok(());
    }
    Err(EngineError::NotRunnable {
        id: session.id.clone(),
        status: session.status.to_string(),
        reason: "no gate is awaiting review".to_string(),
    })
}

/// Items whose payload survived review move on; an empty payload is the one
/// thing the orchestrator checks for itself.
fn review_item(item: &Item) -> ItemOutcome {
    match &item.payload {
        Some(payload) if !payload_is_empty(payload) => ItemOutcome::Generated(payload.clone()),
        _ => ItemOutcome::Failed("empty payload, nothing to review".to_string()),
    }
}

fn item_context(item: &Item, brief: Option<&Value>, last_email: Option<&str>) -> Value {
    let mut ctx = json!({
        "external_id": item.external_id,
        "name": item.name,
        "company": item.company,
        "title": item.title,
        "phone": item.phone,
        "state": item.state,
        "email": item.email,
        "payload": item.payload,
    });
    if let Some(brief) = brief {
        ctx["brief"] = brief.clone();
    }
    if let Some(email) = last_email {
        ctx["last_email"] = json!(email);
    }
    ctx
}

/// Enrichment merges into the existing payload; colliding keys take the new
/// value.
fn merge_payload(existing: Option<&Value>, incoming: Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Object(base)), Value::Object(add)) => {
            let mut merged = base.clone();
            for (key, value) in add {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, incoming) => incoming,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace('\n', "<br>"),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("<br>"),
        other => other.to_string(),
    }
}

/// Render an item's payload as the HTML note body written back to the CRM.
fn render_note(item: &Item) -> String {
    let company = item.company.as_deref().unwrap_or("Unknown company");
    let mut parts = vec![format!(
        "<p><strong>Call prep - {} | {}</strong></p>",
        item.name, company
    )];
    if let Some(Value::Object(payload)) = &item.payload {
        for (key, value) in payload {
            parts.push(format!(
                "<p><strong>{}</strong></p>",
                key.replace('_', " ").to_uppercase()
            ));
            parts.push(format!("<p>{}</p>", render_value(value)));
        }
    }
    parts.join("<br>")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
