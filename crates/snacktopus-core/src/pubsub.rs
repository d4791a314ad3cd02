//! Pub/sub publisher trait.
//!
//! The pub/sub component name is fixed by the implementation; callers only
//! pick the topic.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use snacktopus_types::error::RepositoryError;

pub trait EventPublisher: Send + Sync {
    /// Publish a JSON message to `topic`.
    fn publish(
        &self,
        topic: &str,
        data: &serde_json::Value,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Object-safe version of [`EventPublisher`] with boxed futures.
pub trait EventPublisherDyn: Send + Sync {
    fn publish_boxed<'a>(
        &'a self,
        topic: &'a str,
        data: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;
}

impl<T: EventPublisher> EventPublisherDyn for T {
    fn publish_boxed<'a>(
        &'a self,
        topic: &'a str,
        data: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.publish(topic, data))
    }
}

pub type DynEventPublisher = Arc<dyn EventPublisherDyn>;

/// A message captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub data: serde_json::Value,
}

/// Publisher that logs and records messages instead of sending them.
#[derive(Default)]
pub struct InMemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, oldest first.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, data: &serde_json::Value) -> Result<(), RepositoryError> {
        tracing::info!(topic, "published message (in-memory)");
        self.messages
            .lock()
            .map_err(|_| RepositoryError::Connection)?
            .push(PublishedMessage {
                topic: topic.to_string(),
                data: data.clone(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_publisher_records_in_order() {
        let publisher: DynEventPublisher = Arc::new(InMemoryPublisher::new());
        publisher.publish_boxed("a", &serde_json::json!(1)).await.unwrap();
        publisher.publish_boxed("b", &serde_json::json!(2)).await.unwrap();

        let concrete = InMemoryPublisher::new();
        concrete.publish("smoke.topic", &serde_json::json!({"ping": true})).await.unwrap();
        let messages = concrete.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "smoke.topic");
    }
}
