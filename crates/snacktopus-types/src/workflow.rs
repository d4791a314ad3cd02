//! Workflow domain types for Snacktopus.
//!
//! A `WorkflowInstance` is one execution of a registered workflow. Its
//! progress is persisted as an ordered list of `HistoryEvent`s (one per
//! durable operation) so that a restarted host can replay the workflow
//! function and skip everything that already happened. Events raised before
//! the workflow waits for them are parked as `PendingEvent`s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Runtime status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
///
/// Serialized in the sidecar's wire form (`"RUNNING"`, `"COMPLETED"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowRuntimeStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Terminated,
}

impl WorkflowRuntimeStatus {
    /// Whether the instance can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Wire representation, also used as the SQLite column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for WorkflowRuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowRuntimeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUSPENDED" => Ok(Self::Suspended),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TERMINATED" => Ok(Self::Terminated),
            other => Err(format!("unknown runtime status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow instance
// ---------------------------------------------------------------------------

/// One execution of a registered workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Caller-supplied or generated instance ID.
    pub instance_id: String,
    /// Name the workflow was registered under.
    pub workflow_name: String,
    pub status: WorkflowRuntimeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetails>,
    /// Free-form progress marker set by the workflow itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Build a fresh `Pending` instance.
    pub fn new(
        instance_id: impl Into<String>,
        workflow_name: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            workflow_name: workflow_name.into(),
            status: WorkflowRuntimeStatus::Pending,
            input,
            output: None,
            failure: None,
            custom_status: None,
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// Why an instance failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    /// Machine-readable error category (e.g. "ActivityFailed").
    pub error_type: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Which kind of durable operation a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Activity,
    ExternalEvent,
    Timer,
}

impl HistoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::ExternalEvent => "external_event",
            Self::Timer => "timer",
        }
    }
}

impl std::str::FromStr for HistoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activity" => Ok(Self::Activity),
            "external_event" => Ok(Self::ExternalEvent),
            "timer" => Ok(Self::Timer),
            other => Err(format!("unknown history kind '{other}'")),
        }
    }
}

/// Progress of a single durable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Scheduled,
    Completed,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown activity status '{other}'")),
        }
    }
}

/// Checkpoint for one durable operation of a workflow instance.
///
/// `(instance_id, sequence)` is unique; `sequence` is the 0-based ordinal of
/// the operation inside the workflow function, so replay lines up with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub instance_id: String,
    pub sequence: u32,
    pub kind: HistoryKind,
    /// Activity name, event name, or `"timer"`.
    pub name: String,
    pub status: ActivityStatus,
    /// Number of attempts made so far (activities only; 0 otherwise).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Activity output, event payload, or timer fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Idempotency key handed to activities: stable across retries and replays.
pub fn idempotency_key(instance_id: &str, sequence: u32, activity: &str) -> String {
    format!("{instance_id}:{sequence}:{activity}")
}

/// An external event that arrived before the workflow asked for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    pub instance_id: String,
    /// Lower-cased event name (matching is case-insensitive).
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

/// Normalize an event name for correlation.
pub fn normalize_event_name(name: &str) -> String {
    name.to_lowercase()
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry policy for activity calls.
///
/// Attempts are 1-based: attempt 1 is the first execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_first_retry_interval_ms")]
    pub first_retry_interval_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    /// Overall budget across all attempts (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_first_retry_interval_ms() -> u64 {
    1_000
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_retry_interval_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            first_retry_interval_ms: default_first_retry_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            retry_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` failed, before attempt `attempt + 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.first_retry_interval_ms as f64 * self.backoff_coefficient.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_retry_interval_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
