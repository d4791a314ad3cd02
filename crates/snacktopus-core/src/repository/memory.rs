//! In-process `InstanceRepository` for tests and ephemeral workflow hosts.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use snacktopus_types::error::RepositoryError;
use snacktopus_types::workflow::{HistoryEvent, PendingEvent, WorkflowInstance};

use super::instance::{InstanceRepository, StatusGuard, StatusUpdate};

#[derive(Default)]
struct Tables {
    instances: HashMap<String, WorkflowInstance>,
    history: HashMap<String, BTreeMap<u32, HistoryEvent>>,
    inbox: HashMap<String, VecDeque<PendingEvent>>,
}

/// Keeps every table in a single mutex; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryInstanceRepository {
    tables: Mutex<Tables>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables.lock().map_err(|_| RepositoryError::Connection)
    }
}

impl InstanceRepository for InMemoryInstanceRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if tables.instances.contains_key(&instance.instance_id) {
            return Err(RepositoryError::Conflict(format!(
                "instance '{}' already exists",
                instance.instance_id
            )));
        }
        tables
            .instances
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.tables()?.instances.get(instance_id).cloned())
    }

    async fn transition_status(
        &self,
        instance_id: &str,
        guard: StatusGuard,
        update: &StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables()?;
        let Some(instance) = tables.instances.get_mut(instance_id) else {
            return Ok(false);
        };
        if !guard.matches(instance.status) {
            return Ok(false);
        }
        instance.status = update.status;
        if update.output.is_some() {
            instance.output = update.output.clone();
        }
        if update.failure.is_some() {
            instance.failure = update.failure.clone();
        }
        instance.last_updated_at = update.at;
        Ok(true)
    }

    async fn set_custom_status(
        &self,
        instance_id: &str,
        custom_status: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        let instance = tables.instances.get_mut(instance_id).ok_or(RepositoryError::NotFound)?;
        instance.custom_status = Some(custom_status.to_string());
        instance.last_updated_at = at;
        Ok(())
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let tables = self.tables()?;
        let mut active: Vec<WorkflowInstance> = tables
            .instances
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool, RepositoryError> {
        let mut tables = self.tables()?;
        tables.history.remove(instance_id);
        tables.inbox.remove(instance_id);
        Ok(tables.instances.remove(instance_id).is_some())
    }

    async fn save_history_event(&self, event: &HistoryEvent) -> Result<(), RepositoryError> {
        self.tables()?
            .history
            .entry(event.instance_id.clone())
            .or_default()
            .insert(event.sequence, event.clone());
        Ok(())
    }

    async fn list_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, RepositoryError> {
        Ok(self
            .tables()?
            .history
            .get(instance_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn push_pending_event(&self, event: &PendingEvent) -> Result<(), RepositoryError> {
        self.tables()?
            .inbox
            .entry(event.instance_id.clone())
            .or_default()
            .push_back(event.clone());
        Ok(())
    }

    async fn consume_pending_event(&self, record: &HistoryEvent) -> Result<Option<PendingEvent>, RepositoryError> {
        let mut tables = self.tables()?;
        let taken = tables.inbox.get_mut(&record.instance_id).and_then(|queue| {
            let position = queue.iter().position(|e| e.event_name == record.name)?;
            queue.remove(position)
        });
        let Some(event) = taken else {
            return Ok(None);
        };

        let mut entry = record.clone();
        entry.payload = event.payload.clone();
        tables
            .history
            .entry(entry.instance_id.clone())
            .or_default()
            .insert(entry.sequence, entry);
        Ok(Some(event))
    }

    async fn list_pending_events(&self, instance_id: &str) -> Result<Vec<PendingEvent>, RepositoryError> {
        Ok(self
            .tables()?
            .inbox
            .get(instance_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snacktopus_types::workflow::{ActivityStatus, FailureDetails, HistoryKind, WorkflowRuntimeStatus};

    fn pending(instance_id: &str, name: &str, n: i64) -> PendingEvent {
        PendingEvent {
            instance_id: instance_id.to_string(),
            event_name: name.to_string(),
            payload: Some(serde_json::json!(n)),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let repo = InMemoryInstanceRepository::new();
        let instance = WorkflowInstance::new("wf-1", "hello_snacktopus", None);
        repo.create_instance(&instance).await.unwrap();

        let err = repo.create_instance(&instance).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn active_instances_exclude_terminal() {
        let repo = InMemoryInstanceRepository::new();
        let running = WorkflowInstance::new("a", "hello_snacktopus", None);
        let mut done = WorkflowInstance::new("b", "hello_snacktopus", None);
        done.status = WorkflowRuntimeStatus::Completed;
        repo.create_instance(&running).await.unwrap();
        repo.create_instance(&done).await.unwrap();

        let active = repo.list_active_instances().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].instance_id, "a");
    }

    fn event_record(instance_id: &str, sequence: u32, name: &str) -> HistoryEvent {
        HistoryEvent {
            instance_id: instance_id.to_string(),
            sequence,
            kind: HistoryKind::ExternalEvent,
            name: name.to_string(),
            status: ActivityStatus::Completed,
            attempt: 0,
            idempotency_key: None,
            payload: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transition_respects_guard() {
        let repo = InMemoryInstanceRepository::new();
        repo.create_instance(&WorkflowInstance::new("wf", "hello_snacktopus", None))
            .await
            .unwrap();

        let running = StatusUpdate::new(WorkflowRuntimeStatus::Running);
        let suspended = StatusUpdate::new(WorkflowRuntimeStatus::Suspended);
        assert!(repo.transition_status("wf", StatusGuard::Active, &suspended).await.unwrap());
        // Pending -> Running must not clobber the suspension.
        assert!(
            !repo
                .transition_status("wf", StatusGuard::Is(WorkflowRuntimeStatus::Pending), &running)
                .await
                .unwrap()
        );
        let stored = repo.get_instance("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowRuntimeStatus::Suspended);

        assert!(!repo.transition_status("ghost", StatusGuard::Active, &running).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let repo = InMemoryInstanceRepository::new();
        repo.create_instance(&WorkflowInstance::new("wf", "hello_snacktopus", None))
            .await
            .unwrap();
        let failed = StatusUpdate::new(WorkflowRuntimeStatus::Failed).with_failure(FailureDetails {
            error_type: "ActivityFailed".to_string(),
            message: "boom".to_string(),
        });
        assert!(repo.transition_status("wf", StatusGuard::Active, &failed).await.unwrap());

        let completed = StatusUpdate::new(WorkflowRuntimeStatus::Completed).with_output(Some(serde_json::json!(1)));
        assert!(!repo.transition_status("wf", StatusGuard::Active, &completed).await.unwrap());
        assert!(
            !repo
                .transition_status("wf", StatusGuard::Is(WorkflowRuntimeStatus::Failed), &completed)
                .await
                .unwrap()
        );

        let stored = repo.get_instance("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowRuntimeStatus::Failed);
        assert!(stored.output.is_none());
        assert_eq!(stored.failure.unwrap().message, "boom");
    }

    #[tokio::test]
    async fn custom_status_leaves_status_alone() {
        let repo = InMemoryInstanceRepository::new();
        let mut instance = WorkflowInstance::new("wf", "snacktopus_saga", None);
        instance.status = WorkflowRuntimeStatus::Suspended;
        repo.create_instance(&instance).await.unwrap();

        repo.set_custom_status("wf", "awaiting_approval", Utc::now()).await.unwrap();
        let stored = repo.get_instance("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowRuntimeStatus::Suspended);
        assert_eq!(stored.custom_status.as_deref(), Some("awaiting_approval"));

        assert!(matches!(
            repo.set_custom_status("ghost", "x", Utc::now()).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn history_upserts_by_sequence() {
        let repo = InMemoryInstanceRepository::new();
        let mut event = HistoryEvent {
            instance_id: "wf".to_string(),
            sequence: 0,
            kind: HistoryKind::Activity,
            name: "greet".to_string(),
            status: ActivityStatus::Scheduled,
            attempt: 0,
            idempotency_key: None,
            payload: None,
            error: None,
            recorded_at: Utc::now(),
        };
        repo.save_history_event(&event).await.unwrap();
        event.status = ActivityStatus::Completed;
        event.attempt = 1;
        repo.save_history_event(&event).await.unwrap();

        let history = repo.list_history("wf").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ActivityStatus::Completed);
    }

    #[tokio::test]
    async fn inbox_is_fifo_per_name() {
        let repo = InMemoryInstanceRepository::new();
        repo.push_pending_event(&pending("wf", "humanapproval", 1)).await.unwrap();
        repo.push_pending_event(&pending("wf", "other", 2)).await.unwrap();
        repo.push_pending_event(&pending("wf", "humanapproval", 3)).await.unwrap();

        let first = repo
            .consume_pending_event(&event_record("wf", 0, "humanapproval"))
            .await
            .unwrap()
            .unwrap();
        let second = repo
            .consume_pending_event(&event_record("wf", 1, "humanapproval"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload, Some(serde_json::json!(1)));
        assert_eq!(second.payload, Some(serde_json::json!(3)));
        assert!(
            repo.consume_pending_event(&event_record("wf", 2, "humanapproval"))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.list_pending_events("wf").await.unwrap().len(), 1);

        // Each consumed event became a history entry; the miss saved nothing.
        let history = repo.list_history("wf").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].payload, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn delete_cascades() {
        let repo = InMemoryInstanceRepository::new();
        repo.create_instance(&WorkflowInstance::new("wf", "hello_snacktopus", None))
            .await
            .unwrap();
        repo.push_pending_event(&pending("wf", "x", 1)).await.unwrap();

        assert!(repo.delete_instance("wf").await.unwrap());
        assert!(!repo.delete_instance("wf").await.unwrap());
        assert!(repo.list_pending_events("wf").await.unwrap().is_empty());
    }
}
