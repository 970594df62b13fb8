use crate::collab::Sequencer;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::paths;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Eviction is lazy: expired windows are only swept once the ledger grows
/// past this many keys.
const MAX_DEDUP_KEYS: usize = 1000;

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub contact_id: String,
    pub signal_type: String,
    #[serde(default = "default_strength")]
    pub strength: u32,
    pub observed_at: DateTime<Utc>,
}

fn default_strength() -> u32 {
    1
}

impl Signal {
    pub fn new(contact_id: impl Into<String>, signal_type: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            signal_type: signal_type.into(),
            strength: default_strength(),
            observed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted,
    Deduplicated,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted => "accepted",
            IngestOutcome::Deduplicated => "deduplicated",
        }
    }
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hot,
    Warm,
    Parked,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Parked => "parked",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-intent types go straight to the punch list; medium types are worth
/// enriching first; anything unrecognized parks for batch review.
pub fn tier_for_type(signal_type: &str) -> Tier {
    match signal_type {
        "demo_request" | "pricing_page" | "contact_sales" | "free_trial_signup" | "hand_raise"
        | "inbound_call" | "reply_positive" | "meeting_booked" => Tier::Hot,
        "paywall_hit" | "feature_exploration" | "return_visit" | "content_download"
        | "webinar_attended" | "email_opened_multiple" | "competitor_comparison" => Tier::Warm,
        _ => Tier::Parked,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

fn dedup_key(contact_id: &str, signal_type: &str) -> String {
    format!("{}::{}", contact_id.trim().to_ascii_lowercase(), signal_type)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerSnapshot {
    windows: HashMap<String, DateTime<Utc>>,
    accepted: Vec<Signal>,
}

/// Dedup windows plus the accepted signals they guard. The window for a key
/// slides on every observation, accepted or not, so a contact hammering the
/// same signal stays deduplicated until they go quiet for a full TTL.
#[derive(Debug)]
pub struct SignalLedger {
    ttl: Duration,
    windows: HashMap<String, DateTime<Utc>>,
    accepted: Vec<Signal>,
}

impl SignalLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            windows: HashMap::new(),
            accepted: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.signals.ttl())
    }

    /// Rehydrate from `.dialflow/signals.json`, dropping entries that have
    /// already expired. A snapshot that will not parse is logged and
    /// discarded rather than blocking ingestion.
    pub fn load(root: &Path, config: &Config) -> Self {
        let mut ledger = Self::from_config(config);
        let path = paths::signals_path(root);
        if !path.exists() {
            return ledger;
        }
        let snapshot: LedgerSnapshot = match std::fs::read_to_string(&path)
            .map_err(EngineError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(EngineError::from))
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable signal ledger");
                return ledger;
            }
        };
        let now = Utc::now();
        ledger.windows = snapshot
            .windows
            .into_iter()
            .filter(|(_, last)| now - *last < ledger.ttl)
            .collect();
        ledger.accepted = snapshot
            .accepted
            .into_iter()
            .filter(|s| now - s.observed_at < ledger.ttl)
            .collect();
        info!(
            windows = ledger.windows.len(),
            accepted = ledger.accepted.len(),
            "loaded signal ledger"
        );
        ledger
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let snapshot = LedgerSnapshot {
            windows: self.windows.clone(),
            accepted: self.accepted.clone(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        crate::io::atomic_write(&paths::signals_path(root), &data)
    }

    /// Ingest one signal, judged against the signal's own `observed_at`
    /// clock. Exactly one TTL of silence on a key reopens it.
    pub fn ingest(&mut self, signal: Signal) -> IngestOutcome {
        if self.windows.len() > MAX_DEDUP_KEYS {
            self.evict_expired(signal.observed_at);
        }
        let key = dedup_key(&signal.contact_id, &signal.signal_type);
        let duplicate = self
            .windows
            .get(&key)
            .is_some_and(|last| signal.observed_at - *last < self.ttl);
        self.windows.insert(key, signal.observed_at);
        if duplicate {
            debug!(
                contact = %signal.contact_id,
                signal_type = %signal.signal_type,
                "signal deduplicated"
            );
            return IngestOutcome::Deduplicated;
        }
        info!(
            contact = %signal.contact_id,
            signal_type = %signal.signal_type,
            strength = signal.strength,
            "signal accepted"
        );
        self.accepted.push(signal);
        IngestOutcome::Accepted
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        let before = self.windows.len();
        self.windows.retain(|_, last| now - *last < self.ttl);
        self.accepted.retain(|s| now - s.observed_at < self.ttl);
        debug!(evicted = before - self.windows.len(), "swept expired dedup windows");
    }

    /// Tier is a pure function of the contact's currently live signals,
    /// recomputed on every call. Nothing here stores a tier or runs a
    /// downgrade timer; expiry alone moves a contact back down.
    pub fn classify(&self, contact_id: &str, now: DateTime<Utc>) -> Tier {
        let wanted = contact_id.trim().to_ascii_lowercase();
        let mut tier = Tier::Parked;
        for signal in &self.accepted {
            if signal.contact_id.trim().to_ascii_lowercase() != wanted {
                continue;
            }
            if now - signal.observed_at >= self.ttl {
                continue;
            }
            match tier_for_type(&signal.signal_type) {
                Tier::Hot => return Tier::Hot,
                Tier::Warm => tier = Tier::Warm,
                Tier::Parked => {}
            }
        }
        tier
    }
}

// ---------------------------------------------------------------------------
// Disposition routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    ConnectedInterested,
    ConnectedNotInterested,
    ConnectedCallback,
    Voicemail,
    NoAnswer,
    Busy,
    WrongNumber,
    Gatekeeper,
    MeetingBooked,
    DoNotCall,
}

impl Disposition {
    pub fn all() -> &'static [Disposition] {
        &[
            Disposition::ConnectedInterested,
            Disposition::ConnectedNotInterested,
            Disposition::ConnectedCallback,
            Disposition::Voicemail,
            Disposition::NoAnswer,
            Disposition::Busy,
            Disposition::WrongNumber,
            Disposition::Gatekeeper,
            Disposition::MeetingBooked,
            Disposition::DoNotCall,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::ConnectedInterested => "connected_interested",
            Disposition::ConnectedNotInterested => "connected_not_interested",
            Disposition::ConnectedCallback => "connected_callback",
            Disposition::Voicemail => "voicemail",
            Disposition::NoAnswer => "no_answer",
            Disposition::Busy => "busy",
            Disposition::WrongNumber => "wrong_number",
            Disposition::Gatekeeper => "gatekeeper",
            Disposition::MeetingBooked => "meeting_booked",
            Disposition::DoNotCall => "do_not_call",
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Disposition::ConnectedInterested => Route {
                action: SequenceAction::Advance { delay_hours: None },
                log_entry: "Connected, interested, advancing sequence",
            },
            Disposition::ConnectedNotInterested => Route {
                action: SequenceAction::Finish,
                log_entry: "Connected, not interested, finishing sequence",
            },
            Disposition::ConnectedCallback => Route {
                action: SequenceAction::Advance {
                    delay_hours: Some(48),
                },
                log_entry: "Connected, callback requested",
            },
            Disposition::Voicemail => Route {
                action: SequenceAction::Advance { delay_hours: None },
                log_entry: "Voicemail left, advancing sequence",
            },
            Disposition::NoAnswer => Route {
                action: SequenceAction::Retry { delay_hours: 4 },
                log_entry: "No answer, retry in 4 hours",
            },
            Disposition::Busy => Route {
                action: SequenceAction::Retry { delay_hours: 2 },
                log_entry: "Line busy, retry in 2 hours",
            },
            Disposition::WrongNumber => Route {
                action: SequenceAction::Finish,
                log_entry: "Wrong number, removed from sequence",
            },
            Disposition::Gatekeeper => Route {
                action: SequenceAction::Advance { delay_hours: None },
                log_entry: "Gatekeeper, advancing to email follow-up",
            },
            Disposition::MeetingBooked => Route {
                action: SequenceAction::Transfer,
                log_entry: "Meeting booked, transferred to nurture sequence",
            },
            Disposition::DoNotCall => Route {
                action: SequenceAction::Remove,
                log_entry: "Do Not Call, permanently removed",
            },
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Disposition::all()
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| EngineError::InvalidDisposition(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SequenceAction {
    Advance {
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_hours: Option<u32>,
    },
    Transfer,
    Finish,
    Retry {
        delay_hours: u32,
    },
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    #[serde(flatten)]
    pub action: SequenceAction,
    pub log_entry: &'static str,
}

/// Execute a call disposition against the sequencer. This is the only path
/// that enrolls a contact into a sequence; retry dispositions touch nothing
/// and just hand the delay back to the operator.
pub async fn apply_disposition(
    sequencer: &dyn Sequencer,
    contact_id: &str,
    disposition: Disposition,
    nurture_sequence: &str,
) -> Result<Route> {
    let route = disposition.route();
    match route.action {
        SequenceAction::Advance { .. } => sequencer.advance(contact_id).await?,
        SequenceAction::Transfer => sequencer.enroll(contact_id, nurture_sequence).await?,
        SequenceAction::Finish | SequenceAction::Remove => sequencer.remove(contact_id).await?,
        SequenceAction::Retry { delay_hours } => {
            info!(contact = %contact_id, delay_hours, "retry disposition, sequence untouched");
        }
    }
    info!(contact = %contact_id, disposition = %disposition, "{}", route.log_entry);
    Ok(route)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
