//! Durable publisher
//!
//! Serializes an event to its wire form and enqueues it as a persistent
//! message. A successful publish only means the broker holds the message;
//! persistence happens later on the consumer side.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{Event, WIRE_CONTENT_TYPE};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::queue::{MessageQueue, OutgoingMessage, QueueError};

/// Default bound on a single publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker confirmation for one published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub message_id: Uuid,
}

/// Publish errors
///
/// None of these are retried here; the caller decides.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker rejected publish: {0}")]
    Queue(#[from] QueueError),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Publishes events to one durable queue
///
/// Cheap to clone and safe to share across request handlers.
#[derive(Clone)]
pub struct DurablePublisher {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    timeout: Duration,
}

impl DurablePublisher {
    pub fn new(queue: Arc<dyn MessageQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Set the per-publish timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Enqueue `event` as a persistent message
    ///
    /// The event is expected to be validated already.
    #[instrument(skip(self, event), fields(queue = %self.queue_name, device = %event.device))]
    pub async fn publish(&self, event: &Event) -> Result<PublishAck, PublishError> {
        let body = event.to_wire()?;
        let message = OutgoingMessage::persistent(body, WIRE_CONTENT_TYPE);

        let message_id = tokio::time::timeout(
            self.timeout,
            self.queue.publish(&self.queue_name, message),
        )
        .await
        .map_err(|_| {
            error!(timeout = ?self.timeout, "Publish timed out");
            PublishError::Timeout(self.timeout)
        })?
        .map_err(|e| {
            error!(error = %e, "Failed to publish event");
            PublishError::Queue(e)
        })?;

        debug!(message_id = %message_id, "Event published");
        Ok(PublishAck { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Delivery, InMemoryMessageQueue};
    use async_trait::async_trait;

    /// Queue whose publish never completes in time
    struct StalledQueue;

    #[async_trait]
    impl MessageQueue for StalledQueue {
        async fn declare(&self) -> Result<(), QueueError> {
            Ok(())
        }

        async fn publish(&self, _: &str, _: OutgoingMessage) -> Result<Uuid, QueueError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Uuid::now_v7())
        }

        async fn fetch(
            &self,
            _: &str,
            _: &str,
            _: u32,
            _: Duration,
        ) -> Result<Option<Delivery>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
            Err(QueueError::DeliveryNotFound(delivery.id))
        }

        async fn nack(&self, delivery: &Delivery, _: bool) -> Result<(), QueueError> {
            Err(QueueError::DeliveryNotFound(delivery.id))
        }

        async fn dead_letter(&self, delivery: &Delivery, _: &str) -> Result<(), QueueError> {
            Err(QueueError::DeliveryNotFound(delivery.id))
        }

        async fn reclaim_expired(&self, _: &str) -> Result<Vec<Uuid>, QueueError> {
            Ok(vec![])
        }

        async fn release_held(&self, _: &str, _: &str) -> Result<Vec<Uuid>, QueueError> {
            Ok(vec![])
        }
    }

    fn event() -> Event {
        Event::new("sensor-1", "linux", "temp").with_value("21.5")
    }

    #[tokio::test]
    async fn test_publish_enqueues_persistent_wire_message() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let publisher = DurablePublisher::new(queue.clone(), "events");

        let ack = publisher.publish(&event()).await.unwrap();

        let delivery = queue
            .fetch("events", "c1", 1, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.id, ack.message_id);
        assert_eq!(delivery.content_type, WIRE_CONTENT_TYPE);
        assert_eq!(Event::from_wire(&delivery.body).unwrap(), event());
    }

    #[tokio::test]
    async fn test_broker_failure_is_not_retried() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        queue.set_unavailable(true);
        let publisher = DurablePublisher::new(queue.clone(), "events");

        let err = publisher.publish(&event()).await.unwrap_err();

        assert!(matches!(err, PublishError::Queue(_)));
        queue.set_unavailable(false);
        assert_eq!(queue.published_count(), 0);
        assert_eq!(queue.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_times_out() {
        let publisher = DurablePublisher::new(Arc::new(StalledQueue), "events");
        let started = tokio::time::Instant::now();

        let err = publisher.publish(&event()).await.unwrap_err();

        assert!(matches!(err, PublishError::Timeout(t) if t == DEFAULT_PUBLISH_TIMEOUT));
        assert_eq!(started.elapsed(), DEFAULT_PUBLISH_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout() {
        let publisher = DurablePublisher::new(Arc::new(StalledQueue), "events")
            .with_timeout(Duration::from_millis(250));

        let err = publisher.publish(&event()).await.unwrap_err();
        assert_eq!(err.to_string(), "publish timed out after 250ms");
    }
}
