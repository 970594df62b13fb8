use crate::types::{EventType, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Events buffered per session for late subscribers. Anything older has
/// scrolled out and a reconnecting consumer sees a gap in sequence numbers.
pub const RETENTION_EVENTS: usize = 1024;

const CHANNEL_CAPACITY: usize = 512;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub sequence_number: u64,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ProgressHub
// ---------------------------------------------------------------------------

struct SessionLog {
    next_seq: u64,
    buffer: VecDeque<ProgressEvent>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl SessionLog {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            next_seq: 1,
            buffer: VecDeque::new(),
            tx,
        }
    }
}

/// Append-only per-session event log with live fan-out.
///
/// One producer (the pipeline engine) emits; any number of observers
/// subscribe. Sequence numbers are assigned under the log lock, and
/// `subscribe` snapshots the replay buffer and opens its live receiver under
/// that same lock, so a consumer sees every event exactly once: buffered
/// events come from the replay, later events from the receiver, with nothing
/// lost or duplicated in between.
#[derive(Default)]
pub struct ProgressHub {
    logs: Mutex<HashMap<String, SessionLog>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(
        &self,
        session_id: &str,
        stage: Stage,
        item_id: Option<&str>,
        event_type: EventType,
        payload: Value,
    ) -> ProgressEvent {
        let mut logs = self.logs.lock().expect("progress log lock poisoned");
        let log = logs
            .entry(session_id.to_string())
            .or_insert_with(SessionLog::new);

        let event = ProgressEvent {
            session_id: session_id.to_string(),
            sequence_number: log.next_seq,
            stage,
            item_id: item_id.map(String::from),
            event_type,
            payload,
            timestamp: Utc::now(),
        };
        log.next_seq += 1;
        log.buffer.push_back(event.clone());
        while log.buffer.len() > RETENTION_EVENTS {
            log.buffer.pop_front();
        }
        // No receivers is fine; the buffer still holds the event.
        let _ = log.tx.send(event.clone());
        event
    }

    /// Replay of buffered events with `sequence_number >= from_sequence`,
    /// plus a live receiver for everything after the replay snapshot.
    pub fn subscribe(
        &self,
        session_id: &str,
        from_sequence: u64,
    ) -> (Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let mut logs = self.logs.lock().expect("progress log lock poisoned");
        let log = logs
            .entry(session_id.to_string())
            .or_insert_with(SessionLog::new);
        let replay = log
            .buffer
            .iter()
            .filter(|e| e.sequence_number >= from_sequence)
            .cloned()
            .collect();
        (replay, log.tx.subscribe())
    }

    /// Buffered events only, for one-shot consumers.
    pub fn events_since(&self, session_id: &str, from_sequence: u64) -> Vec<ProgressEvent> {
        let (replay, _rx) = self.subscribe(session_id, from_sequence);
        replay
    }

    /// Highest sequence number assigned for a session, 0 when none.
    pub fn latest_sequence(&self, session_id: &str) -> u64 {
        let logs = self.logs.lock().expect("progress log lock poisoned");
        logs.get(session_id).map(|l| l.next_seq - 1).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
