//! Durable checkpoint manager for workflow instances.
//!
//! Wraps the instance repository to provide a higher-level API for recording
//! the history of each durable operation (activity call, external event wait,
//! timer). Every transition is persisted before the workflow moves forward, so
//! a restarted host can replay an instance from its last checkpoint.

use chrono::{DateTime, Utc};
use serde_json::Value;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::workflow::{
    ActivityStatus, HistoryEvent, HistoryKind, PendingEvent, WorkflowInstance,
};

use crate::repository::instance::{DynInstanceRepository, StatusGuard, StatusUpdate};

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for workflow instances.
///
/// Works with any storage backend behind [`DynInstanceRepository`] (SQLite,
/// in-memory).
#[derive(Clone)]
pub struct CheckpointManager {
    repo: DynInstanceRepository,
}

/// Fields of a history entry that differ between checkpoint kinds.
struct Entry<'a> {
    instance_id: &'a str,
    sequence: u32,
    kind: HistoryKind,
    name: &'a str,
    status: ActivityStatus,
    attempt: u32,
    idempotency_key: Option<String>,
    payload: Option<Value>,
    error: Option<String>,
}

impl Entry<'_> {
    fn to_event(&self) -> HistoryEvent {
        HistoryEvent {
            instance_id: self.instance_id.to_string(),
            sequence: self.sequence,
            kind: self.kind,
            name: self.name.to_string(),
            status: self.status,
            attempt: self.attempt,
            idempotency_key: self.idempotency_key.clone(),
            payload: self.payload.clone(),
            error: self.error.clone(),
            recorded_at: Utc::now(),
        }
    }
}

impl CheckpointManager {
    pub fn new(repo: DynInstanceRepository) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &DynInstanceRepository {
        &self.repo
    }

    async fn save(&self, entry: Entry<'_>) -> Result<(), CheckpointError> {
        let event = entry.to_event();

        self.repo
            .save_history_event_boxed(&event)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            instance_id = entry.instance_id,
            sequence = entry.sequence,
            kind = entry.kind.as_str(),
            name = entry.name,
            status = entry.status.as_str(),
            "checkpointed history"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History checkpoints
    // -----------------------------------------------------------------------

    /// Checkpoint an activity as scheduled, before its first attempt.
    pub async fn record_scheduled(
        &self,
        instance_id: &str,
        sequence: u32,
        activity: &str,
        idempotency_key: &str,
    ) -> Result<(), CheckpointError> {
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::Activity,
            name: activity,
            status: ActivityStatus::Scheduled,
            attempt: 0,
            idempotency_key: Some(idempotency_key.to_string()),
            payload: None,
            error: None,
        })
        .await
    }

    /// Checkpoint an activity as completed with its output.
    pub async fn record_completed(
        &self,
        instance_id: &str,
        sequence: u32,
        activity: &str,
        attempt: u32,
        idempotency_key: &str,
        output: &Value,
    ) -> Result<(), CheckpointError> {
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::Activity,
            name: activity,
            status: ActivityStatus::Completed,
            attempt,
            idempotency_key: Some(idempotency_key.to_string()),
            payload: Some(output.clone()),
            error: None,
        })
        .await
    }

    /// Checkpoint an activity as failed after its last attempt.
    pub async fn record_failed(
        &self,
        instance_id: &str,
        sequence: u32,
        activity: &str,
        attempt: u32,
        idempotency_key: &str,
        error: &str,
    ) -> Result<(), CheckpointError> {
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::Activity,
            name: activity,
            status: ActivityStatus::Failed,
            attempt,
            idempotency_key: Some(idempotency_key.to_string()),
            payload: None,
            error: Some(error.to_string()),
        })
        .await
    }

    /// Checkpoint the start of an external event wait with its deadline.
    pub async fn record_event_wait(
        &self,
        instance_id: &str,
        sequence: u32,
        event_name: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), CheckpointError> {
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::ExternalEvent,
            name: event_name,
            status: ActivityStatus::Scheduled,
            attempt: 0,
            idempotency_key: None,
            payload: deadline.map(|d| Value::String(d.to_rfc3339())),
            error: None,
        })
        .await
    }

    /// Checkpoint a consumed external event (`Ok(payload)`) or a timed-out
    /// wait (`Err(reason)`).
    pub async fn record_event(
        &self,
        instance_id: &str,
        sequence: u32,
        event_name: &str,
        outcome: Result<&Value, &str>,
    ) -> Result<(), CheckpointError> {
        let (status, payload, error) = match outcome {
            Ok(payload) => (ActivityStatus::Completed, Some(payload.clone()), None),
            Err(reason) => (ActivityStatus::Failed, None, Some(reason.to_string())),
        };
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::ExternalEvent,
            name: event_name,
            status,
            attempt: 0,
            idempotency_key: None,
            payload,
            error,
        })
        .await
    }

    /// Take the oldest buffered `event_name` event out of the inbox and
    /// checkpoint it as consumed at `sequence`, atomically.
    ///
    /// Returns `None` when nothing is buffered under that name.
    pub async fn consume_event(
        &self,
        instance_id: &str,
        sequence: u32,
        event_name: &str,
    ) -> Result<Option<PendingEvent>, CheckpointError> {
        let record = Entry {
            instance_id,
            sequence,
            kind: HistoryKind::ExternalEvent,
            name: event_name,
            status: ActivityStatus::Completed,
            attempt: 0,
            idempotency_key: None,
            payload: None,
            error: None,
        }
        .to_event();

        let consumed = self
            .repo
            .consume_pending_event_boxed(&record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if consumed.is_some() {
            tracing::debug!(instance_id, sequence, event = event_name, "checkpointed consumed event");
        }
        Ok(consumed)
    }

    /// Checkpoint a durable timer. The fire time is kept in the payload so a
    /// replay only sleeps for what is left.
    pub async fn record_timer(
        &self,
        instance_id: &str,
        sequence: u32,
        fire_at: DateTime<Utc>,
        fired: bool,
    ) -> Result<(), CheckpointError> {
        self.save(Entry {
            instance_id,
            sequence,
            kind: HistoryKind::Timer,
            name: "timer",
            status: if fired {
                ActivityStatus::Completed
            } else {
                ActivityStatus::Scheduled
            },
            attempt: 0,
            idempotency_key: None,
            payload: Some(Value::String(fire_at.to_rfc3339())),
            error: None,
        })
        .await
    }

    /// Full history of an instance, ordered by sequence.
    pub async fn history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, CheckpointError> {
        self.repo
            .list_history_boxed(instance_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Instance-level checkpoints
    // -----------------------------------------------------------------------

    /// Load an instance, failing if it does not exist.
    pub async fn load_instance(&self, instance_id: &str) -> Result<WorkflowInstance, CheckpointError> {
        self.repo
            .get_instance_boxed(instance_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or_else(|| CheckpointError::InstanceNotFound(instance_id.to_string()))
    }

    /// Persist a status change if the stored status satisfies `guard`.
    ///
    /// Returns `false` when the guard did not match, e.g. the instance was
    /// suspended or finished in the meantime.
    pub async fn update_status(
        &self,
        instance_id: &str,
        guard: StatusGuard,
        update: StatusUpdate,
    ) -> Result<bool, CheckpointError> {
        let applied = self
            .repo
            .transition_status_boxed(instance_id, guard, &update)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        if !applied {
            // Distinguish a lost race from a missing instance.
            self.load_instance(instance_id).await?;
            tracing::debug!(instance_id, status = %update.status, ?guard, "status change skipped");
            return Ok(false);
        }
        tracing::debug!(instance_id, status = %update.status, "checkpointed instance status");
        Ok(true)
    }

    pub async fn set_custom_status(&self, instance_id: &str, custom_status: &str) -> Result<(), CheckpointError> {
        self.repo
            .set_custom_status_boxed(instance_id, custom_status, Utc::now())
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => CheckpointError::InstanceNotFound(instance_id.to_string()),
                other => CheckpointError::Repository(other.to_string()),
            })
    }
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
