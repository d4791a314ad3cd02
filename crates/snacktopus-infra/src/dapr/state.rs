//! `StateStore` backed by a sidecar state store component.

use std::sync::Arc;

use snacktopus_core::storage::state_store::StateStore;
use snacktopus_types::error::RepositoryError;
use snacktopus_types::sidecar::StateEntry;

use super::client::SidecarClient;

pub struct DaprStateStore {
    client: Arc<SidecarClient>,
    store_name: String,
}

impl DaprStateStore {
    pub fn new(client: Arc<SidecarClient>, store_name: impl Into<String>) -> Self {
        Self {
            client,
            store_name: store_name.into(),
        }
    }
}

impl StateStore for DaprStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.client.get_state(&self.store_name, key).await?)
    }

    async fn save(&self, entries: &[StateEntry]) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }
        Ok(self.client.save_state(&self.store_name, entries).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        Ok(self.client.delete_state(&self.store_name, key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dapr::fake::FakeSidecar;

    #[tokio::test]
    async fn test_state_store_through_sidecar() {
        let sidecar = FakeSidecar::start().await;
        let store = DaprStateStore::new(Arc::new(SidecarClient::new(sidecar.url())), "statestore");

        store
            .save(&[StateEntry {
                key: "snack-request:wf-1".to_string(),
                value: serde_json::json!({ "status": "pending_approval" }),
            }])
            .await
            .unwrap();
        assert_eq!(
            store.get("snack-request:wf-1").await.unwrap(),
            Some(serde_json::json!({ "status": "pending_approval" }))
        );

        store.delete("snack-request:wf-1").await.unwrap();
        assert!(store.get("snack-request:wf-1").await.unwrap().is_none());
    }
}
