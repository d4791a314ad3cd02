//! SQLite workflow instance repository implementation.
//!
//! Implements `InstanceRepository` from `snacktopus-core` using sqlx with
//! split read/write pools. Inputs, outputs and history payloads are stored as
//! JSON text; timestamps as RFC 3339 strings.

use chrono::{DateTime, Utc};
use snacktopus_core::repository::instance::{InstanceRepository, StatusGuard, StatusUpdate};
use snacktopus_types::error::RepositoryError;
use snacktopus_types::workflow::{
    ActivityStatus, FailureDetails, HistoryEvent, HistoryKind, PendingEvent, WorkflowInstance,
    WorkflowRuntimeStatus,
};
use sqlx::Row;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct InstanceRow {
    instance_id: String,
    workflow_name: String,
    status: String,
    input: Option<String>,
    output: Option<String>,
    failure_type: Option<String>,
    failure_message: Option<String>,
    custom_status: Option<String>,
    created_at: String,
    last_updated_at: String,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            failure_type: row.try_get("failure_type")?,
            failure_message: row.try_get("failure_message")?,
            custom_status: row.try_get("custom_status")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status: WorkflowRuntimeStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let failure = match (self.failure_type, self.failure_message) {
            (Some(error_type), message) => Some(FailureDetails {
                error_type,
                message: message.unwrap_or_default(),
            }),
            (None, _) => None,
        };

        Ok(WorkflowInstance {
            instance_id: self.instance_id,
            workflow_name: self.workflow_name,
            status,
            input: parse_json(self.input)?,
            output: parse_json(self.output)?,
            failure,
            custom_status: self.custom_status,
            created_at: parse_datetime(&self.created_at)?,
            last_updated_at: parse_datetime(&self.last_updated_at)?,
        })
    }
}

struct HistoryRow {
    instance_id: String,
    sequence: i64,
    kind: String,
    name: String,
    status: String,
    attempt: i64,
    idempotency_key: Option<String>,
    payload: Option<String>,
    error: Option<String>,
    recorded_at: String,
}

impl HistoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            sequence: row.try_get("sequence")?,
            kind: row.try_get("kind")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            idempotency_key: row.try_get("idempotency_key")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_event(self) -> Result<HistoryEvent, RepositoryError> {
        let kind: HistoryKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let status: ActivityStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let sequence = u32::try_from(self.sequence)
            .map_err(|e| RepositoryError::Query(format!("invalid sequence: {e}")))?;
        let attempt = u32::try_from(self.attempt)
            .map_err(|e| RepositoryError::Query(format!("invalid attempt: {e}")))?;

        Ok(HistoryEvent {
            instance_id: self.instance_id,
            sequence,
            kind,
            name: self.name,
            status,
            attempt,
            idempotency_key: self.idempotency_key,
            payload: parse_json(self.payload)?,
            error: self.error,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

struct InboxRow {
    instance_id: String,
    event_name: String,
    payload: Option<String>,
    received_at: String,
}

impl InboxRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            received_at: row.try_get("received_at")?,
        })
    }

    fn into_event(self) -> Result<PendingEvent, RepositoryError> {
        Ok(PendingEvent {
            instance_id: self.instance_id,
            event_name: self.event_name,
            payload: parse_json(self.payload)?,
            received_at: parse_datetime(&self.received_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: Option<String>) -> Result<Option<serde_json::Value>, RepositoryError> {
    s.map(|text| {
        serde_json::from_str(&text).map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))
    })
    .transpose()
}

fn format_json(value: Option<&serde_json::Value>) -> Result<Option<String>, RepositoryError> {
    value
        .map(|v| {
            serde_json::to_string(v)
                .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))
        })
        .transpose()
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

const UPSERT_HISTORY: &str = r#"INSERT INTO workflow_history
    (instance_id, sequence, kind, name, status, attempt, idempotency_key, payload, error, recorded_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(instance_id, sequence) DO UPDATE SET
        kind = excluded.kind,
        name = excluded.name,
        status = excluded.status,
        attempt = excluded.attempt,
        idempotency_key = excluded.idempotency_key,
        payload = excluded.payload,
        error = excluded.error,
        recorded_at = excluded.recorded_at"#;

fn upsert_history(event: &HistoryEvent) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>, RepositoryError> {
    Ok(sqlx::query(UPSERT_HISTORY)
        .bind(&event.instance_id)
        .bind(i64::from(event.sequence))
        .bind(event.kind.as_str())
        .bind(&event.name)
        .bind(event.status.as_str())
        .bind(i64::from(event.attempt))
        .bind(event.idempotency_key.as_deref())
        .bind(format_json(event.payload.as_ref())?)
        .bind(event.error.as_deref())
        .bind(format_datetime(&event.recorded_at)))
}

// ---------------------------------------------------------------------------
// InstanceRepository implementation
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO workflow_instances
               (instance_id, workflow_name, status, input, output, failure_type, failure_message,
                custom_status, created_at, last_updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.workflow_name)
        .bind(instance.status.as_str())
        .bind(format_json(instance.input.as_ref())?)
        .bind(format_json(instance.output.as_ref())?)
        .bind(instance.failure.as_ref().map(|f| f.error_type.as_str()))
        .bind(instance.failure.as_ref().map(|f| f.message.as_str()))
        .bind(instance.custom_status.as_deref())
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.last_updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(RepositoryError::Conflict(
                format!("instance '{}' already exists", instance.instance_id),
            )),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let instance_row = InstanceRow::from_row(&row).map_err(query_error)?;
                Ok(Some(instance_row.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn transition_status(
        &self,
        instance_id: &str,
        guard: StatusGuard,
        update: &StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        let expected = match guard {
            StatusGuard::Active => None,
            StatusGuard::Is(status) => Some(status.as_str()),
        };
        // Check and write in one statement; terminal rows never match.
        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = ?,
                   output = COALESCE(?, output),
                   failure_type = COALESCE(?, failure_type),
                   failure_message = COALESCE(?, failure_message),
                   last_updated_at = ?
               WHERE instance_id = ?
                 AND status NOT IN ('COMPLETED', 'FAILED', 'TERMINATED')
                 AND (? IS NULL OR status = ?)"#,
        )
        .bind(update.status.as_str())
        .bind(format_json(update.output.as_ref())?)
        .bind(update.failure.as_ref().map(|f| f.error_type.as_str()))
        .bind(update.failure.as_ref().map(|f| f.message.as_str()))
        .bind(format_datetime(&update.at))
        .bind(instance_id)
        .bind(expected)
        .bind(expected)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_custom_status(
        &self,
        instance_id: &str,
        custom_status: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET custom_status = ?, last_updated_at = ? WHERE instance_id = ?",
        )
        .bind(custom_status)
        .bind(format_datetime(&at))
        .bind(instance_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE status NOT IN ('COMPLETED', 'FAILED', 'TERMINATED')
               ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                InstanceRow::from_row(row)
                    .map_err(query_error)
                    .and_then(InstanceRow::into_instance)
            })
            .collect()
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool, RepositoryError> {
        // History and inbox rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM workflow_instances WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_history_event(&self, event: &HistoryEvent) -> Result<(), RepositoryError> {
        upsert_history(event)?
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(())
    }

    async fn list_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_history WHERE instance_id = ? ORDER BY sequence ASC")
            .bind(instance_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                HistoryRow::from_row(row)
                    .map_err(query_error)
                    .and_then(HistoryRow::into_event)
            })
            .collect()
    }

    async fn push_pending_event(&self, event: &PendingEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow_inbox (instance_id, event_name, payload, received_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.instance_id)
        .bind(&event.event_name)
        .bind(format_json(event.payload.as_ref())?)
        .bind(format_datetime(&event.received_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn consume_pending_event(&self, record: &HistoryEvent) -> Result<Option<PendingEvent>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let row = sqlx::query(
            r#"DELETE FROM workflow_inbox
               WHERE id = (
                   SELECT id FROM workflow_inbox
                   WHERE instance_id = ? AND event_name = ?
                   ORDER BY id ASC LIMIT 1
               )
               RETURNING instance_id, event_name, payload, received_at"#,
        )
        .bind(&record.instance_id)
        .bind(&record.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(query_error)?;
            return Ok(None);
        };
        let event = InboxRow::from_row(&row).map_err(query_error)?.into_event()?;

        let mut entry = record.clone();
        entry.payload = event.payload.clone();
        upsert_history(&entry)?
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(Some(event))
    }

    async fn list_pending_events(&self, instance_id: &str) -> Result<Vec<PendingEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT instance_id, event_name, payload, received_at FROM workflow_inbox
               WHERE instance_id = ? ORDER BY id ASC"#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                InboxRow::from_row(row)
                    .map_err(query_error)
                    .and_then(InboxRow::into_event)
            })
            .collect()
    }
}
