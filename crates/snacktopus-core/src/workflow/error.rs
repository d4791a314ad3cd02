//! Error types for the workflow runtime and activities.

use snacktopus_types::workflow::WorkflowRuntimeStatus;

use super::checkpoint::CheckpointError;

/// Errors raised by the runtime, by workflow functions, and by the context
/// operations they call.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' is not registered")]
    WorkflowNotRegistered(String),

    #[error("activity '{0}' is not registered")]
    ActivityNotRegistered(String),

    #[error("{kind} '{name}' is already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("workflow instance '{0}' already exists")]
    InstanceAlreadyExists(String),

    #[error("workflow instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("workflow instance '{instance_id}' is not running (status {status})")]
    InstanceNotRunning {
        instance_id: String,
        status: WorkflowRuntimeStatus,
    },

    /// Purge was requested for an instance that has not finished.
    #[error("workflow instance '{instance_id}' is still {status}")]
    InstanceNotTerminal {
        instance_id: String,
        status: WorkflowRuntimeStatus,
    },

    #[error("activity '{activity}' failed after {attempts} attempt(s): {message}")]
    ActivityFailed {
        activity: String,
        attempts: u32,
        message: String,
    },

    #[error("timed out waiting for event '{0}'")]
    EventTimeout(String),

    #[error("workflow instance '{0}' did not finish in time")]
    CompletionTimeout(String),

    /// History recorded a different operation at this position than the
    /// workflow function now asks for.
    #[error("non-deterministic workflow: sequence {sequence} recorded '{recorded}', replay asked for '{requested}'")]
    NonDeterministic {
        sequence: u32,
        recorded: String,
        requested: String,
    },

    #[error("workflow instance was terminated")]
    Terminated,

    #[error("runtime is shutting down")]
    ShuttingDown,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("workflow failed: {0}")]
    Failed(String),
}

impl WorkflowError {
    /// Machine-readable category stored in an instance's failure details.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::WorkflowNotRegistered(_) => "WorkflowNotRegistered",
            Self::ActivityNotRegistered(_) => "ActivityNotRegistered",
            Self::DuplicateRegistration { .. } => "DuplicateRegistration",
            Self::InstanceAlreadyExists(_) => "InstanceAlreadyExists",
            Self::InstanceNotFound(_) => "InstanceNotFound",
            Self::InstanceNotRunning { .. } => "InstanceNotRunning",
            Self::InstanceNotTerminal { .. } => "InstanceNotTerminal",
            Self::ActivityFailed { .. } => "ActivityFailed",
            Self::EventTimeout(_) => "EventTimeout",
            Self::CompletionTimeout(_) => "CompletionTimeout",
            Self::NonDeterministic { .. } => "NonDeterministic",
            Self::Terminated => "Terminated",
            Self::ShuttingDown => "ShuttingDown",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Checkpoint(_) => "CheckpointError",
            Self::Failed(_) => "WorkflowFailed",
        }
    }
}

/// Error returned by an activity attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivityError {
    /// Transient failure; the retry policy applies.
    #[error("{0}")]
    Failed(String),

    /// The input can never succeed; retrying is pointless.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<snacktopus_types::error::RepositoryError> for ActivityError {
    fn from(e: snacktopus_types::error::RepositoryError) -> Self {
        Self::Failed(e.to_string())
    }
}
