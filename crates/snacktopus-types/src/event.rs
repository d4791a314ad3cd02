//! Lifecycle events for the workflow runtime's event bus.
//!
//! `WorkflowEvent` is broadcast by the runtime as instances move through
//! their lifecycle. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowRuntimeStatus;

/// Events emitted while workflow instances run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    InstanceScheduled {
        instance_id: String,
        workflow_name: String,
    },

    /// The orchestrator task began (or resumed after a restart).
    InstanceStarted {
        instance_id: String,
        replaying: bool,
    },

    ActivityCompleted {
        instance_id: String,
        activity: String,
        sequence: u32,
        attempt: u32,
    },

    /// An activity attempt failed and another one is scheduled.
    ActivityRetried {
        instance_id: String,
        activity: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    EventRaised {
        instance_id: String,
        event_name: String,
        /// The event always lands in the inbox first; true when a running
        /// instance was signalled to pick it up.
        woke_instance: bool,
    },

    /// The instance reached a new runtime status.
    StatusChanged {
        instance_id: String,
        status: WorkflowRuntimeStatus,
    },
}

impl WorkflowEvent {
    /// Instance the event belongs to.
    pub fn instance_id(&self) -> &str {
        match self {
            Self::InstanceScheduled { instance_id, .. }
            | Self::InstanceStarted { instance_id, .. }
            | Self::ActivityCompleted { instance_id, .. }
            | Self::ActivityRetried { instance_id, .. }
            | Self::EventRaised { instance_id, .. }
            | Self::StatusChanged { instance_id, .. } => instance_id,
        }
    }
}
