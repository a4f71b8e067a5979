// Consumer worker
// Decision: The subscriber runs on its own task; the caller owns the shutdown trigger
// Decision: Shutdown never interrupts a delivery; the in-flight ack/nack decision completes first

use std::future::Future;
use std::sync::Arc;

use relay_durable::{
    DurableSubscriber, EventSink, MessageQueue, SubscriberConfig, SubscriberError, SubscriberStats,
};
use tracing::{error, info};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),

    #[error("subscriber task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// =============================================================================
// ConsumerWorker
// =============================================================================

/// Drives a [`DurableSubscriber`] until a shutdown signal arrives
pub struct ConsumerWorker {
    subscriber: Arc<DurableSubscriber>,
}

impl ConsumerWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        sink: Arc<dyn EventSink>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            subscriber: Arc::new(DurableSubscriber::new(queue, sink, config)),
        }
    }

    pub fn subscriber(&self) -> &Arc<DurableSubscriber> {
        &self.subscriber
    }

    /// Consume until `shutdown` resolves, then wait for the loop to settle
    /// its in-flight delivery
    ///
    /// Returns early with an error if the subscriber stops on its own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<SubscriberStats, ConsumerError>
    where
        F: Future<Output = ()>,
    {
        let config = self.subscriber.config();
        info!(
            queue = %config.queue_name,
            consumer_id = %config.consumer_id,
            max_redeliveries = ?config.max_redeliveries,
            "Starting consumer"
        );

        let subscriber = self.subscriber.clone();
        let mut handle = tokio::spawn(async move { subscriber.run().await });

        tokio::select! {
            result = &mut handle => {
                let result = result?;
                if let Err(e) = &result {
                    error!(error = %e, "Subscriber stopped unexpectedly");
                }
                return Ok(result?);
            }
            _ = shutdown => {
                info!("Received shutdown signal");
            }
        }

        self.subscriber.shutdown();
        let stats = handle.await??;
        info!("Consumer shutdown complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Event;
    use relay_durable::{InMemoryEventSink, InMemoryMessageQueue, OutgoingMessage};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_shutdown() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let sink = Arc::new(InMemoryEventSink::new());
        let body = Event::new("sensor-1", "linux", "temp").to_wire().unwrap();
        queue
            .publish("events", OutgoingMessage::persistent(body, "application/json"))
            .await
            .unwrap();

        let worker = ConsumerWorker::new(queue.clone(), sink.clone(), SubscriberConfig::new("events"));
        let stats = worker
            .run_until(tokio::time::sleep(Duration::from_secs(2)))
            .await
            .unwrap();

        assert_eq!(stats.acked, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(queue.message_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_subscriber_failure_ends_run() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        queue.set_unavailable(true);

        let worker = ConsumerWorker::new(
            queue,
            Arc::new(InMemoryEventSink::new()),
            SubscriberConfig::new("events"),
        );
        let err = worker
            .run_until(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, ConsumerError::Subscriber(_)));
    }
}
