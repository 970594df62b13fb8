use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SessionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    CallPrep,
    Prospecting,
}

impl SessionKind {
    pub fn all() -> &'static [SessionKind] {
        &[SessionKind::CallPrep, SessionKind::Prospecting]
    }

    /// Ordered stage list for this pipeline kind.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            SessionKind::CallPrep => &[
                Stage::Fetch,
                Stage::Generate,
                Stage::Review,
                Stage::Write,
                Stage::Notify,
            ],
            SessionKind::Prospecting => &[
                Stage::Discover,
                Stage::Qualify,
                Stage::EnrichCompany,
                Stage::EnrichPerson,
                Stage::Export,
            ],
        }
    }

    pub fn first_stage(self) -> Stage {
        self.stages()[0]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::CallPrep => "call_prep",
            SessionKind::Prospecting => "prospecting",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionKind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call_prep" | "call-prep" => Ok(SessionKind::CallPrep),
            "prospecting" => Ok(SessionKind::Prospecting),
            _ => Err(crate::error::EngineError::InvalidKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    // call_prep pipeline
    Fetch,
    Generate,
    Review,
    Write,
    Notify,
    // prospecting pipeline
    Discover,
    Qualify,
    EnrichCompany,
    EnrichPerson,
    Export,
}

impl Stage {
    /// True for stages that end in a human approval gate: the session holds
    /// in awaiting_qa until every generated item is resolved.
    pub fn is_gate(self) -> bool {
        matches!(self, Stage::Review | Stage::Qualify | Stage::EnrichPerson)
    }

    /// True for stages that populate the item list from the CRM instead of
    /// processing existing items.
    pub fn is_fetch(self) -> bool {
        matches!(self, Stage::Fetch | Stage::Discover)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Generate => "generate",
            Stage::Review => "review",
            Stage::Write => "write",
            Stage::Notify => "notify",
            Stage::Discover => "discover",
            Stage::Qualify => "qualify",
            Stage::EnrichCompany => "enrich_company",
            Stage::EnrichPerson => "enrich_person",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Stage::Fetch),
            "generate" => Ok(Stage::Generate),
            "review" => Ok(Stage::Review),
            "write" => Ok(Stage::Write),
            "notify" => Ok(Stage::Notify),
            "discover" => Ok(Stage::Discover),
            "qualify" => Ok(Stage::Qualify),
            "enrich_company" => Ok(Stage::EnrichCompany),
            "enrich_person" => Ok(Stage::EnrichPerson),
            "export" => Ok(Stage::Export),
            _ => Err(crate::error::EngineError::InvalidStage(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    AwaitingQa,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    /// Active sessions hold the at-most-one-per-resource-key slot.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::AwaitingQa)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::AwaitingQa => "awaiting_qa",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "awaiting_qa" => Ok(SessionStatus::AwaitingQa),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "aborted" => Ok(SessionStatus::Aborted),
            _ => Err(crate::error::EngineError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Generated,
    Approved,
    Rejected,
    Edited,
    Written,
    Error,
}

impl ItemStatus {
    /// Position in the per-stage progression
    /// pending -> generated -> (approved|rejected|edited) -> written.
    /// Error sits outside the ladder and is handled separately.
    pub fn rank(self) -> Option<u8> {
        match self {
            ItemStatus::Pending => Some(0),
            ItemStatus::Generated => Some(1),
            ItemStatus::Approved | ItemStatus::Rejected | ItemStatus::Edited => Some(2),
            ItemStatus::Written => Some(3),
            ItemStatus::Error => None,
        }
    }

    /// QA resolutions an operator can assign to a generated item.
    pub fn is_qa_resolution(self) -> bool {
        matches!(
            self,
            ItemStatus::Approved | ItemStatus::Rejected | ItemStatus::Edited
        )
    }

    /// Items in these states move forward when the stage pointer advances.
    pub fn survives_stage_advance(self) -> bool {
        matches!(
            self,
            ItemStatus::Pending | ItemStatus::Generated | ItemStatus::Approved | ItemStatus::Edited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Generated => "generated",
            ItemStatus::Approved => "approved",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Edited => "edited",
            ItemStatus::Written => "written",
            ItemStatus::Error => "error",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "generated" => Ok(ItemStatus::Generated),
            "approved" => Ok(ItemStatus::Approved),
            "rejected" => Ok(ItemStatus::Rejected),
            "edited" => Ok(ItemStatus::Edited),
            "written" => Ok(ItemStatus::Written),
            "error" => Ok(ItemStatus::Error),
            _ => Err(crate::error::EngineError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StageStarted,
    StageCompleted,
    ItemCompleted,
    ItemFailed,
    ItemSkipped,
    AwaitingQa,
    Warning,
    SessionCompleted,
    SessionFailed,
    SessionAborted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::StageStarted => "stage_started",
            EventType::StageCompleted => "stage_completed",
            EventType::ItemCompleted => "item_completed",
            EventType::ItemFailed => "item_failed",
            EventType::ItemSkipped => "item_skipped",
            EventType::AwaitingQa => "awaiting_qa",
            EventType::Warning => "warning",
            EventType::SessionCompleted => "session_completed",
            EventType::SessionFailed => "session_failed",
            EventType::SessionAborted => "session_aborted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
