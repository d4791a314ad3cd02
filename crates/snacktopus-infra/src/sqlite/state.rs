//! SQLite key-value state store.
//!
//! Local stand-in for the sidecar's state store component, used by
//! `seed-memory` when no sidecar is running. Values are stored as JSON text.

use chrono::Utc;
use snacktopus_core::storage::state_store::StateStore;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::sidecar::StateEntry;
use sqlx::Row;

use super::pool::DatabasePool;

pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM state_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let value_str: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let value: serde_json::Value = serde_json::from_str(&value_str)
                    .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, entries: &[StateEntry]) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for entry in entries {
            let value_str = serde_json::to_string(&entry.value)
                .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;
            sqlx::query(
                r#"INSERT INTO state_entries (key, value, updated_at)
                   VALUES (?, ?, ?)
                   ON CONFLICT(key) DO UPDATE SET
                       value = excluded.value,
                       updated_at = excluded.updated_at"#,
            )
            .bind(&entry.key)
            .bind(&value_str)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM state_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (SqliteStateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteStateStore::new(pool), dir)
    }

    #[tokio::test]
    async fn test_save_get_overwrite_delete() {
        let (store, _dir) = test_store().await;

        assert!(store.get("smoke:key").await.unwrap().is_none());

        store
            .save(&[StateEntry {
                key: "smoke:key".to_string(),
                value: serde_json::json!({ "ok": true }),
            }])
            .await
            .unwrap();
        assert_eq!(
            store.get("smoke:key").await.unwrap(),
            Some(serde_json::json!({ "ok": true }))
        );

        store
            .save(&[StateEntry {
                key: "smoke:key".to_string(),
                value: serde_json::json!("replaced"),
            }])
            .await
            .unwrap();
        assert_eq!(store.get("smoke:key").await.unwrap(), Some(serde_json::json!("replaced")));

        store.delete("smoke:key").await.unwrap();
        assert!(store.get("smoke:key").await.unwrap().is_none());

        // Deleting a missing key is not an error
        store.delete("smoke:key").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_batch() {
        let (store, _dir) = test_store().await;
        let entries: Vec<StateEntry> = (0..3)
            .map(|i| StateEntry {
                key: format!("doc:{i}"),
                value: serde_json::json!({ "i": i }),
            })
            .collect();
        store.save(&entries).await.unwrap();

        for i in 0..3 {
            assert_eq!(
                store.get(&format!("doc:{i}")).await.unwrap(),
                Some(serde_json::json!({ "i": i }))
            );
        }
    }
}
