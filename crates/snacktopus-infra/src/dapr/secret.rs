//! `SecretProvider` backed by a sidecar secret store component.

use std::sync::Arc;

use snacktopus_core::repository::secret::{SecretProvider, SecretValues};
use snacktopus_types::error::RepositoryError;

use super::client::SidecarClient;

pub struct DaprSecretProvider {
    client: Arc<SidecarClient>,
    store_name: String,
}

impl DaprSecretProvider {
    pub fn new(client: Arc<SidecarClient>, store_name: impl Into<String>) -> Self {
        Self {
            client,
            store_name: store_name.into(),
        }
    }
}

impl SecretProvider for DaprSecretProvider {
    fn name(&self) -> &str {
        "dapr"
    }

    async fn get(&self, secret_name: &str) -> Result<Option<SecretValues>, RepositoryError> {
        Ok(self.client.get_secret(&self.store_name, secret_name).await?)
    }
}
