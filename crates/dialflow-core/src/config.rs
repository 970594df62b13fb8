use crate::error::{EngineError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OperatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// The operator's own zone; call-sheet clock math is rendered against it.
    #[serde(default = "default_operator_timezone")]
    pub timezone: String,
    /// Channel the notify stage posts dial-plan summaries to.
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_operator_timezone() -> String {
    "pacific".to_string()
}

fn default_channel() -> String {
    "#dial-plan".to_string()
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            timezone: default_operator_timezone(),
            channel: default_channel(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle past this are marked aborted on reconcile instead of
    /// being resumed against stale CRM state.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u32,
    /// Concurrent collaborator calls per stage.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_staleness_hours() -> u32 {
    12
}

fn default_parallelism() -> usize {
    4
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            staleness_hours: default_staleness_hours(),
            parallelism: default_parallelism(),
        }
    }
}

impl SessionConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.staleness_hours))
    }
}

// ---------------------------------------------------------------------------
// SignalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Sliding dedup window per (contact, signal type).
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Sequence a meeting-booked contact is transferred into.
    #[serde(default = "default_nurture_sequence")]
    pub nurture_sequence: String,
}

fn default_ttl_seconds() -> u64 {
    86_400
}

fn default_nurture_sequence() -> String {
    "nurture".to_string()
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            nurture_sequence: default_nurture_sequence(),
        }
    }
}

impl SignalConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

// ---------------------------------------------------------------------------
// QualifyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifyConfig {
    /// Items scoring below this at the qualify stage are auto-rejected.
    /// Scores run 0-10.
    #[serde(default = "default_min_score")]
    pub min_score: u32,
}

fn default_min_score() -> u32 {
    8
}

impl Default for QualifyConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub qualify: QualifyConfig,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(EngineError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        use std::str::FromStr;

        let mut warnings = Vec::new();

        if crate::callsheet::Zone::from_str(&self.operator.timezone).is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "unknown operator.timezone '{}' (expected eastern, central, mountain, \
                     pacific, alaska, or hawaii)",
                    self.operator.timezone
                ),
            });
        }

        if self.operator.channel.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "operator.channel is empty; the notify stage has nowhere to post"
                    .to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.base_delay_ms={} exceeds retry.max_delay_ms={}",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            });
        }

        if self.session.parallelism == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "session.parallelism must be at least 1".to_string(),
            });
        }

        if self.session.staleness_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "session.staleness_hours=0 marks every resumed session stale".to_string(),
            });
        }

        if self.signals.ttl_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "signals.ttl_seconds=0 disables deduplication".to_string(),
            });
        }

        if self.signals.nurture_sequence.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "signals.nurture_sequence must not be empty".to_string(),
            });
        }

        if self.qualify.min_score > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "qualify.min_score={} is above the 0-10 scoring scale; every item \
                     will be rejected",
                    self.qualify.min_score
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
