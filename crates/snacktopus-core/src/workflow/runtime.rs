//! Workflow runtime: schedules instances, drives them as tokio tasks, and
//! exposes the management operations (raise event, terminate, suspend,
//! resume, purge) that the workflow host serves over HTTP.
//!
//! # Execution flow
//!
//! 1. `schedule_new_workflow` persists a `Pending` instance.
//! 2. Once the runtime is started, each instance runs on its own task: the
//!    status moves to `Running`, the workflow function is invoked with a
//!    fresh [`WorkflowContext`], and its result is persisted as `Completed`
//!    or `Failed`.
//! 3. On `start()` after a restart, every non-terminal instance is driven
//!    again; its history makes the replay skip finished work.
//! 4. `shutdown()` aborts in-flight tasks without touching their persisted
//!    status, so the next `start()` picks them up.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::event::WorkflowEvent;
use snacktopus_types::workflow::{
    FailureDetails, PendingEvent, WorkflowInstance, WorkflowRuntimeStatus, normalize_event_name,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{InstanceControl, WorkflowContext};
use super::error::WorkflowError;
use super::registry::WorkflowRegistry;
use crate::event::EventBus;
use crate::repository::instance::{DynInstanceRepository, StatusGuard, StatusUpdate};

fn repo_error(e: RepositoryError) -> WorkflowError {
    WorkflowError::Checkpoint(CheckpointError::Repository(e.to_string()))
}

// ---------------------------------------------------------------------------
// WorkflowRuntime
// ---------------------------------------------------------------------------

/// Hosts registered workflows. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WorkflowRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: Arc<WorkflowRegistry>,
    checkpoint: CheckpointManager,
    event_bus: EventBus,
    /// Signals for instances that are running or have been addressed.
    controls: DashMap<String, Arc<InstanceControl>>,
    /// Driver tasks keyed by instance ID.
    tasks: DashMap<String, JoinHandle<()>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
}

impl WorkflowRuntime {
    pub fn new(registry: WorkflowRegistry, repository: DynInstanceRepository, event_bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                registry: Arc::new(registry),
                checkpoint: CheckpointManager::new(repository),
                event_bus,
                controls: DashMap::new(),
                tasks: DashMap::new(),
                started: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.inner.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    fn repo(&self) -> &DynInstanceRepository {
        self.inner.checkpoint.repo()
    }

    fn ensure_accepting(&self) -> Result<(), WorkflowError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(WorkflowError::ShuttingDown);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start executing instances and resume every non-terminal one.
    ///
    /// Returns the number of instances resumed.
    pub async fn start(&self) -> Result<usize, WorkflowError> {
        self.ensure_accepting()?;
        self.inner.started.store(true, Ordering::SeqCst);

        let active = self.repo().list_active_instances_boxed().await.map_err(repo_error)?;
        let mut resumed = 0;
        for instance in active {
            if self.spawn_instance(instance) {
                resumed += 1;
            }
        }

        tracing::info!(
            resumed,
            workflows = ?self.inner.registry.workflow_names(),
            "workflow runtime started"
        );
        Ok(resumed)
    }

    /// Stop accepting work and abort in-flight tasks.
    ///
    /// Persisted statuses are left as they are so the next `start()`
    /// resumes the aborted instances.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let mut aborted = 0;
        for entry in self.inner.tasks.iter() {
            if !entry.value().is_finished() {
                entry.value().abort();
                aborted += 1;
            }
        }
        self.inner.tasks.clear();
        self.inner.controls.clear();
        tracing::info!(aborted, "workflow runtime stopped");
    }

    /// Wait for `signal`, then shut down.
    pub async fn wait_for_shutdown<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown();
    }

    fn control_for(&self, instance_id: &str, suspended: bool) -> Arc<InstanceControl> {
        self.inner
            .controls
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(InstanceControl::new(suspended)))
            .clone()
    }

    /// Spawn the driver task for `instance` unless one is already running.
    fn spawn_instance(&self, instance: WorkflowInstance) -> bool {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
        if self.inner.tasks.contains_key(&instance.instance_id) {
            return false;
        }

        let suspended = instance.status == WorkflowRuntimeStatus::Suspended;
        let control = self.control_for(&instance.instance_id, suspended);
        control.set_suspended(suspended);

        let instance_id = instance.instance_id.clone();
        let span = tracing::info_span!(
            "workflow.instance",
            instance_id = %instance.instance_id,
            workflow = %instance.workflow_name,
        );
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(drive(inner, instance, control).instrument(span));
        self.inner.tasks.insert(instance_id, handle);
        true
    }

    // -----------------------------------------------------------------------
    // Scheduling and queries
    // -----------------------------------------------------------------------

    /// Schedule a new instance of workflow `name`.
    ///
    /// Generates a time-ordered ID when `instance_id` is None or empty. An
    /// existing terminal instance with the same ID is purged and replaced.
    pub async fn schedule_new_workflow(
        &self,
        name: &str,
        instance_id: Option<String>,
        input: Option<Value>,
    ) -> Result<String, WorkflowError> {
        self.ensure_accepting()?;
        if self.inner.registry.workflow(name).is_none() {
            return Err(WorkflowError::WorkflowNotRegistered(name.to_string()));
        }

        let instance_id = instance_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        if let Some(existing) = self.repo().get_instance_boxed(&instance_id).await.map_err(repo_error)? {
            if !existing.status.is_terminal() {
                return Err(WorkflowError::InstanceAlreadyExists(instance_id));
            }
            tracing::debug!(instance_id = %instance_id, "replacing finished instance");
            self.remove_instance(&instance_id).await?;
        }

        let instance = WorkflowInstance::new(instance_id.clone(), name, input);
        self.repo()
            .create_instance_boxed(&instance)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => WorkflowError::InstanceAlreadyExists(instance_id.clone()),
                other => repo_error(other),
            })?;

        self.inner.event_bus.publish(WorkflowEvent::InstanceScheduled {
            instance_id: instance_id.clone(),
            workflow_name: name.to_string(),
        });
        tracing::info!(instance_id = %instance_id, workflow = name, "scheduled workflow instance");

        if self.is_started() {
            self.spawn_instance(instance);
        }
        Ok(instance_id)
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, WorkflowError> {
        self.repo().get_instance_boxed(instance_id).await.map_err(repo_error)
    }

    async fn require_instance(&self, instance_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        self.get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))
    }

    async fn require_active(&self, instance_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        let instance = self.require_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Err(WorkflowError::InstanceNotRunning {
                instance_id: instance_id.to_string(),
                status: instance.status,
            });
        }
        Ok(instance)
    }

    /// Wait until the instance reaches a terminal status.
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let mut events = self.inner.event_bus.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let instance = self.require_instance(instance_id).await?;
            if instance.status.is_terminal() {
                return Ok(instance);
            }
            if tokio::time::timeout_at(deadline, next_status_change(&mut events, instance_id))
                .await
                .is_err()
            {
                return Err(WorkflowError::CompletionTimeout(instance_id.to_string()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Management
    // -----------------------------------------------------------------------

    /// Deliver an external event to an instance.
    ///
    /// The event is persisted in the instance's inbox before this returns,
    /// so it survives a shutdown even if the workflow is already waiting.
    pub async fn raise_event(
        &self,
        instance_id: &str,
        event_name: &str,
        payload: Option<Value>,
    ) -> Result<(), WorkflowError> {
        self.require_active(instance_id).await?;
        let event = PendingEvent {
            instance_id: instance_id.to_string(),
            event_name: normalize_event_name(event_name),
            payload,
            received_at: Utc::now(),
        };
        self.repo().push_pending_event_boxed(&event).await.map_err(repo_error)?;

        let woke_instance = match self.inner.controls.get(instance_id) {
            Some(control) => {
                control.notify_inbox();
                true
            }
            None => false,
        };

        self.inner.event_bus.publish(WorkflowEvent::EventRaised {
            instance_id: instance_id.to_string(),
            event_name: event_name.to_string(),
            woke_instance,
        });
        tracing::info!(instance_id, event_name, woke_instance, "raised external event");
        Ok(())
    }

    /// Terminate an instance. Terminating a finished instance is a no-op.
    pub async fn terminate(&self, instance_id: &str, reason: Option<String>) -> Result<(), WorkflowError> {
        let instance = self.require_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(());
        }

        if let Some((_, control)) = self.inner.controls.remove(instance_id) {
            control.cancel.cancel();
        }
        let update = StatusUpdate::new(WorkflowRuntimeStatus::Terminated).with_output(reason.map(Value::String));
        // Lost to a completion that landed first: the instance is finished either way.
        if !self
            .inner
            .checkpoint
            .update_status(instance_id, StatusGuard::Active, update)
            .await?
        {
            return Ok(());
        }
        self.publish_status(instance_id, WorkflowRuntimeStatus::Terminated);
        tracing::info!(instance_id, "terminated workflow instance");
        Ok(())
    }

    /// Pause an instance at its next durable operation.
    pub async fn suspend(&self, instance_id: &str) -> Result<(), WorkflowError> {
        let instance = self.require_active(instance_id).await?;
        if instance.status == WorkflowRuntimeStatus::Suspended {
            return Ok(());
        }
        self.control_for(instance_id, true).set_suspended(true);
        if !self
            .inner
            .checkpoint
            .update_status(
                instance_id,
                StatusGuard::Active,
                StatusUpdate::new(WorkflowRuntimeStatus::Suspended),
            )
            .await?
        {
            return Ok(());
        }
        self.publish_status(instance_id, WorkflowRuntimeStatus::Suspended);
        tracing::info!(instance_id, "suspended workflow instance");
        Ok(())
    }

    /// Resume a suspended instance. Resuming a running instance is a no-op.
    pub async fn resume(&self, instance_id: &str) -> Result<(), WorkflowError> {
        let instance = self.require_active(instance_id).await?;
        if instance.status != WorkflowRuntimeStatus::Suspended {
            return Ok(());
        }
        self.control_for(instance_id, false).set_suspended(false);
        if !self
            .inner
            .checkpoint
            .update_status(
                instance_id,
                StatusGuard::Is(WorkflowRuntimeStatus::Suspended),
                StatusUpdate::new(WorkflowRuntimeStatus::Running),
            )
            .await?
        {
            return Ok(());
        }
        self.publish_status(instance_id, WorkflowRuntimeStatus::Running);
        tracing::info!(instance_id, "resumed workflow instance");
        Ok(())
    }

    /// Delete a finished instance with its history and inbox.
    pub async fn purge(&self, instance_id: &str) -> Result<(), WorkflowError> {
        let instance = self.require_instance(instance_id).await?;
        if !instance.status.is_terminal() {
            return Err(WorkflowError::InstanceNotTerminal {
                instance_id: instance_id.to_string(),
                status: instance.status,
            });
        }
        self.remove_instance(instance_id).await?;
        tracing::info!(instance_id, "purged workflow instance");
        Ok(())
    }

    async fn remove_instance(&self, instance_id: &str) -> Result<(), WorkflowError> {
        self.repo().delete_instance_boxed(instance_id).await.map_err(repo_error)?;
        self.inner.controls.remove(instance_id);
        self.inner.tasks.remove(instance_id);
        Ok(())
    }

    fn publish_status(&self, instance_id: &str, status: WorkflowRuntimeStatus) {
        self.inner.event_bus.publish(WorkflowEvent::StatusChanged {
            instance_id: instance_id.to_string(),
            status,
        });
    }
}

impl std::fmt::Debug for WorkflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("started", &self.is_started())
            .field("running", &self.inner.tasks.len())
            .finish()
    }
}

async fn next_status_change(events: &mut broadcast::Receiver<WorkflowEvent>, instance_id: &str) {
    loop {
        match events.recv().await {
            Ok(WorkflowEvent::StatusChanged { instance_id: id, .. }) if id == instance_id => return,
            Ok(_) => continue,
            // Missed events: let the caller re-read the instance.
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Instance driver
// ---------------------------------------------------------------------------

async fn drive(inner: Arc<RuntimeInner>, instance: WorkflowInstance, control: Arc<InstanceControl>) {
    let instance_id = instance.instance_id.clone();
    if let Err(e) = run_instance(&inner, instance, &control).await {
        tracing::error!(instance_id = %instance_id, error = %e, "failed to persist workflow progress");
    }
    if !control.cancel.is_cancelled() {
        inner
            .controls
            .remove_if(&instance_id, |_, current| Arc::ptr_eq(current, &control));
    }
}

async fn run_instance(
    inner: &RuntimeInner,
    instance: WorkflowInstance,
    control: &Arc<InstanceControl>,
) -> Result<(), CheckpointError> {
    let instance_id = instance.instance_id.as_str();
    let publish = |status| {
        inner.event_bus.publish(WorkflowEvent::StatusChanged {
            instance_id: instance_id.to_string(),
            status,
        })
    };

    // Terminated between scheduling and this task starting.
    let current = inner.checkpoint.load_instance(instance_id).await?;
    if current.status.is_terminal() || control.cancel.is_cancelled() {
        return Ok(());
    }

    let Some(workflow) = inner.registry.workflow(&instance.workflow_name) else {
        let error = WorkflowError::WorkflowNotRegistered(instance.workflow_name.clone());
        tracing::error!(error = %error, "cannot run instance");
        let update = StatusUpdate::new(WorkflowRuntimeStatus::Failed).with_failure(failure_of(&error));
        if inner.checkpoint.update_status(instance_id, StatusGuard::Active, update).await? {
            publish(WorkflowRuntimeStatus::Failed);
        }
        return Ok(());
    };

    let history = inner.checkpoint.history(instance_id).await?;
    let replaying = !history.is_empty();

    // Guarded so a suspend issued while history loaded is kept.
    if current.status == WorkflowRuntimeStatus::Pending
        && inner
            .checkpoint
            .update_status(
                instance_id,
                StatusGuard::Is(WorkflowRuntimeStatus::Pending),
                StatusUpdate::new(WorkflowRuntimeStatus::Running),
            )
            .await?
    {
        publish(WorkflowRuntimeStatus::Running);
    }
    inner.event_bus.publish(WorkflowEvent::InstanceStarted {
        instance_id: instance_id.to_string(),
        replaying,
    });
    tracing::info!(replaying, history = history.len(), "running workflow instance");

    let ctx = WorkflowContext::new(
        instance.instance_id.clone(),
        instance.workflow_name.clone(),
        Arc::clone(&inner.registry),
        inner.checkpoint.clone(),
        inner.event_bus.clone(),
        Arc::clone(control),
        history,
    );
    let result = workflow(ctx, instance.input.clone()).await;

    if control.cancel.is_cancelled() {
        tracing::debug!("instance terminated while running");
        return Ok(());
    }

    let update = match &result {
        Ok(output) => StatusUpdate::new(WorkflowRuntimeStatus::Completed).with_output(Some(output.clone())),
        Err(error) => StatusUpdate::new(WorkflowRuntimeStatus::Failed).with_failure(failure_of(error)),
    };
    let status = update.status;
    if !inner.checkpoint.update_status(instance_id, StatusGuard::Active, update).await? {
        return Ok(());
    }
    publish(status);
    match result {
        Ok(_) => tracing::info!("workflow instance completed"),
        Err(error) => tracing::warn!(error = %error, "workflow instance failed"),
    }
    Ok(())
}

fn failure_of(error: &WorkflowError) -> FailureDetails {
    FailureDetails {
        error_type: error.error_type().to_string(),
        message: error.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
