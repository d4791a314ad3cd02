//! `EventPublisher` backed by a sidecar pub/sub component.

use std::sync::Arc;

use snacktopus_core::pubsub::EventPublisher;
use snacktopus_types::error::RepositoryError;

use super::client::SidecarClient;

pub struct DaprPublisher {
    client: Arc<SidecarClient>,
    pubsub_name: String,
}

impl DaprPublisher {
    pub fn new(client: Arc<SidecarClient>, pubsub_name: impl Into<String>) -> Self {
        Self {
            client,
            pubsub_name: pubsub_name.into(),
        }
    }
}

impl EventPublisher for DaprPublisher {
    async fn publish(&self, topic: &str, data: &serde_json::Value) -> Result<(), RepositoryError> {
        Ok(self.client.publish(&self.pubsub_name, topic, data).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dapr::fake::FakeSidecar;

    #[tokio::test]
    async fn test_publish_goes_to_configured_component() {
        let sidecar = FakeSidecar::start().await;
        let publisher = DaprPublisher::new(Arc::new(SidecarClient::new(sidecar.url())), "events");

        publisher
            .publish("snack.dispatched", &serde_json::json!({ "snack": "nachos" }))
            .await
            .unwrap();

        let published = sidecar.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "events/snack.dispatched");
    }
}
