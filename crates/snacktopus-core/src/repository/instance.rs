//! Workflow instance repository trait definition.
//!
//! Defines the storage interface for workflow instances, their durable
//! history, and the inbox of external events that arrived before the
//! workflow asked for them. The infrastructure layer (snacktopus-infra)
//! implements this trait with SQLite persistence; [`super::memory`] holds an
//! in-process implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::workflow::{
    FailureDetails, HistoryEvent, PendingEvent, WorkflowInstance, WorkflowRuntimeStatus,
};

/// Which current status a conditional status write accepts.
///
/// A terminal instance never matches, whatever the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGuard {
    /// Any non-terminal status.
    Active,
    /// Exactly this status.
    Is(WorkflowRuntimeStatus),
}

impl StatusGuard {
    pub fn matches(self, current: WorkflowRuntimeStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        match self {
            Self::Active => true,
            Self::Is(expected) => current == expected,
        }
    }
}

/// New status of an instance. `output` and `failure` are only written when set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: WorkflowRuntimeStatus,
    pub output: Option<Value>,
    pub failure: Option<FailureDetails>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(status: WorkflowRuntimeStatus) -> Self {
        Self {
            status,
            output: None,
            failure: None,
            at: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }

    pub fn with_failure(mut self, failure: FailureDetails) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Repository trait for workflow instance persistence.
///
/// Covers three entity families:
/// - **Instances:** create/query workflow executions and guarded status writes.
/// - **History:** one checkpoint per durable operation, keyed by sequence.
/// - **Inbox:** buffered external events, consumed oldest first.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait InstanceRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Insert a new instance. Fails with `Conflict` if the ID is taken.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Apply `update` only if the stored status satisfies `guard`.
    ///
    /// Returns `false` when the guard did not match or the instance is
    /// missing. Check and write happen atomically.
    fn transition_status(
        &self,
        instance_id: &str,
        guard: StatusGuard,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Write only the custom status column. Fails with `NotFound` if the
    /// instance is missing.
    fn set_custom_status(
        &self,
        instance_id: &str,
        custom_status: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Instances that are not in a terminal status (crash recovery).
    fn list_active_instances(
        &self,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Delete an instance with its history and inbox. Returns `true` if it existed.
    fn delete_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Upsert a history entry keyed by `(instance_id, sequence)`.
    fn save_history_event(
        &self,
        event: &HistoryEvent,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// All history entries of an instance, ordered by sequence.
    fn list_history(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<Vec<HistoryEvent>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Inbox
    // -----------------------------------------------------------------------

    fn push_pending_event(
        &self,
        event: &PendingEvent,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove the oldest buffered event named `record.name` and save `record`
    /// carrying that event's payload, in one transaction.
    ///
    /// Returns the consumed event, or `None` (and saves nothing) when no such
    /// event is buffered. `record.name` is expected to be normalized already.
    fn consume_pending_event(
        &self,
        record: &HistoryEvent,
    ) -> impl Future<Output = Result<Option<PendingEvent>, RepositoryError>> + Send;

    fn list_pending_events(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<Vec<PendingEvent>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`InstanceRepository`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing
/// `InstanceRepository`, so the runtime can hold any backend behind an `Arc`.
pub trait InstanceRepositoryDyn: Send + Sync {
    fn create_instance_boxed<'a>(&'a self, instance: &'a WorkflowInstance) -> BoxFut<'a, ()>;

    fn get_instance_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Option<WorkflowInstance>>;

    fn transition_status_boxed<'a>(
        &'a self,
        instance_id: &'a str,
        guard: StatusGuard,
        update: &'a StatusUpdate,
    ) -> BoxFut<'a, bool>;

    fn set_custom_status_boxed<'a>(
        &'a self,
        instance_id: &'a str,
        custom_status: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFut<'a, ()>;

    fn list_active_instances_boxed(&self) -> BoxFut<'_, Vec<WorkflowInstance>>;

    fn delete_instance_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, bool>;

    fn save_history_event_boxed<'a>(&'a self, event: &'a HistoryEvent) -> BoxFut<'a, ()>;

    fn list_history_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Vec<HistoryEvent>>;

    fn push_pending_event_boxed<'a>(&'a self, event: &'a PendingEvent) -> BoxFut<'a, ()>;

    fn consume_pending_event_boxed<'a>(&'a self, record: &'a HistoryEvent) -> BoxFut<'a, Option<PendingEvent>>;

    fn list_pending_events_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Vec<PendingEvent>>;
}

impl<T: InstanceRepository> InstanceRepositoryDyn for T {
    fn create_instance_boxed<'a>(&'a self, instance: &'a WorkflowInstance) -> BoxFut<'a, ()> {
        Box::pin(self.create_instance(instance))
    }

    fn get_instance_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Option<WorkflowInstance>> {
        Box::pin(self.get_instance(instance_id))
    }

    fn transition_status_boxed<'a>(
        &'a self,
        instance_id: &'a str,
        guard: StatusGuard,
        update: &'a StatusUpdate,
    ) -> BoxFut<'a, bool> {
        Box::pin(self.transition_status(instance_id, guard, update))
    }

    fn set_custom_status_boxed<'a>(
        &'a self,
        instance_id: &'a str,
        custom_status: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFut<'a, ()> {
        Box::pin(self.set_custom_status(instance_id, custom_status, at))
    }

    fn list_active_instances_boxed(&self) -> BoxFut<'_, Vec<WorkflowInstance>> {
        Box::pin(self.list_active_instances())
    }

    fn delete_instance_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, bool> {
        Box::pin(self.delete_instance(instance_id))
    }

    fn save_history_event_boxed<'a>(&'a self, event: &'a HistoryEvent) -> BoxFut<'a, ()> {
        Box::pin(self.save_history_event(event))
    }

    fn list_history_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Vec<HistoryEvent>> {
        Box::pin(self.list_history(instance_id))
    }

    fn push_pending_event_boxed<'a>(&'a self, event: &'a PendingEvent) -> BoxFut<'a, ()> {
        Box::pin(self.push_pending_event(event))
    }

    fn consume_pending_event_boxed<'a>(&'a self, record: &'a HistoryEvent) -> BoxFut<'a, Option<PendingEvent>> {
        Box::pin(self.consume_pending_event(record))
    }

    fn list_pending_events_boxed<'a>(&'a self, instance_id: &'a str) -> BoxFut<'a, Vec<PendingEvent>> {
        Box::pin(self.list_pending_events(instance_id))
    }
}

/// Type-erased instance repository shared by the runtime and its tasks.
pub type DynInstanceRepository = Arc<dyn InstanceRepositoryDyn>;
