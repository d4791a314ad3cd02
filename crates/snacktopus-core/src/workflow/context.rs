//! Workflow and activity contexts.
//!
//! A [`WorkflowContext`] is handed to every workflow function. Each durable
//! operation it offers (activity call, external event wait, timer) takes the
//! next sequence number. When the instance's history already holds a result
//! for that sequence the operation is answered from history instead of being
//! executed again; this is how a restarted host replays an instance up to
//! the point where it stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use snacktopus_types::event::WorkflowEvent;
use snacktopus_types::workflow::{
    ActivityStatus, HistoryEvent, HistoryKind, RetryPolicy, idempotency_key, normalize_event_name,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::checkpoint::CheckpointManager;
use super::error::WorkflowError;
use super::registry::WorkflowRegistry;
use super::retry::RetryHandler;
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// ActivityContext
// ---------------------------------------------------------------------------

/// Identifies one attempt of an activity call.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub instance_id: String,
    pub activity: String,
    pub sequence: u32,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Stable across retries and replays of the same call.
    pub idempotency_key: String,
}

// ---------------------------------------------------------------------------
// InstanceControl
// ---------------------------------------------------------------------------

/// Signals shared between the runtime and a running instance.
///
/// External events never travel through here: they are persisted to the
/// inbox first and `inbox` only tells waiters to look again.
pub(crate) struct InstanceControl {
    pub(crate) cancel: CancellationToken,
    suspended: watch::Sender<bool>,
    /// Bumped after every inbox write for this instance.
    inbox: watch::Sender<u64>,
}

impl InstanceControl {
    pub(crate) fn new(suspended: bool) -> Self {
        let (suspended, _) = watch::channel(suspended);
        let (inbox, _) = watch::channel(0);
        Self {
            cancel: CancellationToken::new(),
            suspended,
            inbox,
        }
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.suspended.send_replace(suspended);
    }

    /// Wake event waiters after an inbox write.
    pub(crate) fn notify_inbox(&self) {
        self.inbox.send_modify(|n| *n = n.wrapping_add(1));
    }
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Handle a workflow function uses to perform durable operations.
///
/// Cheap to clone; all clones share the same sequence counter.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    instance_id: String,
    workflow_name: String,
    registry: Arc<WorkflowRegistry>,
    checkpoint: CheckpointManager,
    event_bus: EventBus,
    control: Arc<InstanceControl>,
    history: HashMap<u32, HistoryEvent>,
    replay_len: u32,
    next_sequence: AtomicU32,
}

impl WorkflowContext {
    pub(crate) fn new(
        instance_id: String,
        workflow_name: String,
        registry: Arc<WorkflowRegistry>,
        checkpoint: CheckpointManager,
        event_bus: EventBus,
        control: Arc<InstanceControl>,
        history: Vec<HistoryEvent>,
    ) -> Self {
        let replay_len = history.iter().map(|e| e.sequence + 1).max().unwrap_or(0);
        let history = history.into_iter().map(|e| (e.sequence, e)).collect();
        Self {
            inner: Arc::new(ContextInner {
                instance_id,
                workflow_name,
                registry,
                checkpoint,
                event_bus,
                control,
                history,
                replay_len,
                next_sequence: AtomicU32::new(0),
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.inner.workflow_name
    }

    /// True while the next durable operation will be answered from history.
    pub fn is_replaying(&self) -> bool {
        self.inner.next_sequence.load(Ordering::SeqCst) < self.inner.replay_len
    }

    fn allocate_sequence(&self) -> u32 {
        self.inner.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// History entry for `sequence`, checked against what the workflow asks for now.
    fn recorded(&self, sequence: u32, kind: HistoryKind, name: &str) -> Result<Option<&HistoryEvent>, WorkflowError> {
        match self.inner.history.get(&sequence) {
            Some(entry) if entry.kind == kind && entry.name == name => Ok(Some(entry)),
            Some(entry) => Err(WorkflowError::NonDeterministic {
                sequence,
                recorded: format!("{}:{}", entry.kind.as_str(), entry.name),
                requested: format!("{}:{}", kind.as_str(), name),
            }),
            None => Ok(None),
        }
    }

    /// Block while the instance is suspended; fail once it is terminated.
    async fn gate(&self) -> Result<(), WorkflowError> {
        let control = &self.inner.control;
        let mut suspended = control.suspended.subscribe();
        loop {
            if control.cancel.is_cancelled() {
                return Err(WorkflowError::Terminated);
            }
            if !*suspended.borrow_and_update() {
                return Ok(());
            }
            tracing::debug!(instance_id = %self.inner.instance_id, "instance suspended, waiting");
            tokio::select! {
                _ = control.cancel.cancelled() => return Err(WorkflowError::Terminated),
                changed = suspended.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Activities
    // -----------------------------------------------------------------------

    /// Call a registered activity, retrying per `retry` (default policy if None).
    pub async fn call_activity(
        &self,
        activity: &str,
        input: Option<Value>,
        retry: Option<RetryPolicy>,
    ) -> Result<Value, WorkflowError> {
        self.gate().await?;
        let sequence = self.allocate_sequence();
        let instance_id = self.inner.instance_id.as_str();

        if let Some(entry) = self.recorded(sequence, HistoryKind::Activity, activity)? {
            match entry.status {
                ActivityStatus::Completed => {
                    tracing::debug!(instance_id, activity, sequence, "replayed activity result");
                    return Ok(entry.payload.clone().unwrap_or(Value::Null));
                }
                ActivityStatus::Failed => {
                    return Err(WorkflowError::ActivityFailed {
                        activity: activity.to_string(),
                        attempts: entry.attempt,
                        message: entry.error.clone().unwrap_or_default(),
                    });
                }
                // Interrupted mid-flight: run it again under the same key.
                ActivityStatus::Scheduled => {}
            }
        }

        let run = self
            .inner
            .registry
            .activity(activity)
            .ok_or_else(|| WorkflowError::ActivityNotRegistered(activity.to_string()))?;
        let policy = retry.unwrap_or_default();
        let key = idempotency_key(instance_id, sequence, activity);
        let checkpoint = &self.inner.checkpoint;
        let cancel = &self.inner.control.cancel;

        checkpoint
            .record_scheduled(instance_id, sequence, activity, &key)
            .await?;

        let started = Instant::now();
        let mut attempt = 1;
        loop {
            let ctx = ActivityContext {
                instance_id: instance_id.to_string(),
                activity: activity.to_string(),
                sequence,
                attempt,
                idempotency_key: key.clone(),
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(WorkflowError::Terminated),
                result = run(ctx, input.clone()) => result,
            };
            // The instance may have been terminated (and its id reused)
            // while the attempt ran; its history is no longer ours to write.
            if cancel.is_cancelled() {
                return Err(WorkflowError::Terminated);
            }

            match outcome {
                Ok(output) => {
                    checkpoint
                        .record_completed(instance_id, sequence, activity, attempt, &key, &output)
                        .await?;
                    self.inner.event_bus.publish(WorkflowEvent::ActivityCompleted {
                        instance_id: instance_id.to_string(),
                        activity: activity.to_string(),
                        sequence,
                        attempt,
                    });
                    return Ok(output);
                }
                Err(error) if RetryHandler::should_retry(&policy, attempt, &error, started.elapsed()) => {
                    let delay = RetryHandler::delay(&policy, attempt);
                    tracing::warn!(
                        instance_id,
                        activity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "activity attempt failed, retrying"
                    );
                    self.inner.event_bus.publish(WorkflowEvent::ActivityRetried {
                        instance_id: instance_id.to_string(),
                        activity: activity.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(WorkflowError::Terminated),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    checkpoint
                        .record_failed(instance_id, sequence, activity, attempt, &key, &message)
                        .await?;
                    tracing::warn!(instance_id, activity, attempt, error = %message, "activity failed");
                    return Err(WorkflowError::ActivityFailed {
                        activity: activity.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // External events
    // -----------------------------------------------------------------------

    /// Wait for an external event named `name` (case-insensitive).
    ///
    /// Consumes the oldest buffered event with that name if one arrived
    /// early. With a `timeout`, fails with [`WorkflowError::EventTimeout`]
    /// once it elapses; the deadline is checkpointed so a restart does not
    /// extend it.
    pub async fn wait_for_external_event(&self, name: &str, timeout: Option<Duration>) -> Result<Value, WorkflowError> {
        self.gate().await?;
        let sequence = self.allocate_sequence();
        let event_name = normalize_event_name(name);
        let instance_id = self.inner.instance_id.as_str();
        let checkpoint = &self.inner.checkpoint;

        let deadline = match self.recorded(sequence, HistoryKind::ExternalEvent, &event_name)? {
            Some(entry) => match entry.status {
                ActivityStatus::Completed => {
                    return Ok(entry.payload.clone().unwrap_or(Value::Null));
                }
                ActivityStatus::Failed => return Err(WorkflowError::EventTimeout(name.to_string())),
                ActivityStatus::Scheduled => entry
                    .payload
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
            },
            None => {
                let deadline = match timeout {
                    Some(t) => Some(
                        Utc::now()
                            + chrono::Duration::from_std(t)
                                .map_err(|e| WorkflowError::InvalidInput(e.to_string()))?,
                    ),
                    None => None,
                };
                checkpoint
                    .record_event_wait(instance_id, sequence, &event_name, deadline)
                    .await?;
                deadline
            }
        };

        let control = &self.inner.control;
        let mut inbox = control.inbox.subscribe();
        let remaining = deadline.map(|d| (d - Utc::now()).to_std().unwrap_or(Duration::ZERO));
        let timer = sleep_for(remaining);
        tokio::pin!(timer);

        loop {
            // Mark the current inbox version seen before looking, so a write
            // that lands after the lookup still wakes us.
            inbox.mark_unchanged();
            if control.cancel.is_cancelled() {
                return Err(WorkflowError::Terminated);
            }
            if let Some(event) = checkpoint.consume_event(instance_id, sequence, &event_name).await? {
                tracing::debug!(instance_id, event = %event_name, "external event consumed");
                return Ok(event.payload.unwrap_or(Value::Null));
            }

            tracing::debug!(instance_id, event = %event_name, "waiting for external event");
            tokio::select! {
                _ = control.cancel.cancelled() => return Err(WorkflowError::Terminated),
                changed = inbox.changed() => {
                    if changed.is_err() {
                        return Err(WorkflowError::Terminated);
                    }
                }
                _ = &mut timer => break,
            }
        }

        // An event may have landed just before the deadline.
        if let Some(event) = checkpoint.consume_event(instance_id, sequence, &event_name).await? {
            return Ok(event.payload.unwrap_or(Value::Null));
        }
        checkpoint
            .record_event(instance_id, sequence, &event_name, Err("timeout"))
            .await?;
        tracing::info!(instance_id, event = %event_name, "external event wait timed out");
        Err(WorkflowError::EventTimeout(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Timers and status
    // -----------------------------------------------------------------------

    /// Durable sleep.
    pub async fn create_timer(&self, duration: Duration) -> Result<(), WorkflowError> {
        self.gate().await?;
        let sequence = self.allocate_sequence();
        let instance_id = self.inner.instance_id.as_str();
        let checkpoint = &self.inner.checkpoint;

        let fire_at = match self.recorded(sequence, HistoryKind::Timer, "timer")? {
            Some(entry) if entry.status == ActivityStatus::Completed => return Ok(()),
            Some(entry) => entry
                .payload
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            None => {
                let fire_at = Utc::now()
                    + chrono::Duration::from_std(duration).map_err(|e| WorkflowError::InvalidInput(e.to_string()))?;
                checkpoint.record_timer(instance_id, sequence, fire_at, false).await?;
                fire_at
            }
        };

        let remaining = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = self.inner.control.cancel.cancelled() => return Err(WorkflowError::Terminated),
            _ = tokio::time::sleep(remaining) => {}
        }
        if self.inner.control.cancel.is_cancelled() {
            return Err(WorkflowError::Terminated);
        }
        checkpoint.record_timer(instance_id, sequence, fire_at, true).await?;
        Ok(())
    }

    /// Free-form progress marker visible in the instance's state.
    pub async fn set_custom_status(&self, status: &str) -> Result<(), WorkflowError> {
        self.inner
            .checkpoint
            .set_custom_status(&self.inner.instance_id, status)
            .await?;
        Ok(())
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
