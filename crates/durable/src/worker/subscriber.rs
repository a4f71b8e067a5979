//! Durable subscriber loop
//!
//! Pulls one delivery at a time, decodes it, stamps it with the persistence
//! time, writes it through the [`EventSink`] and hands the outcome to the
//! [`DeliveryCoordinator`]. Shutdown is only observed between deliveries, so
//! a store write that has started always runs to completion or failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use relay_core::Event;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::coordinator::{Acknowledgment, DeliveryCoordinator, DeliveryOutcome};
use super::poller::{DeliveryPoller, LeaseSettings, PollerConfig};
use crate::persistence::{EventSink, PersistError};
use crate::queue::{Delivery, MessageQueue, QueueError};

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub queue_name: String,

    /// Identity used for leases and the prefetch bound
    pub consumer_id: String,

    /// Maximum unacknowledged deliveries held at once
    pub prefetch: u32,

    /// How long a delivery stays leased before it can be reclaimed
    pub lease: Duration,

    /// Per-write bound on the persistence sink
    pub persist_timeout: Duration,

    /// How often expired leases are returned to the queue
    pub reclaim_interval: Duration,

    /// Dead-letter after this many redeliveries; `None` retries forever
    pub max_redeliveries: Option<u32>,

    pub poller: PollerConfig,
}

impl SubscriberConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            consumer_id: format!("consumer-{}", Uuid::now_v7()),
            prefetch: 1,
            lease: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(5),
            reclaim_interval: Duration::from_secs(30),
            max_redeliveries: None,
            poller: PollerConfig::default(),
        }
    }

    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = consumer_id.into();
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn with_max_redeliveries(mut self, max: Option<u32>) -> Self {
        self.max_redeliveries = max;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }
}

/// Counters for settled deliveries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub dead_lettered: u64,
}

impl SubscriberStats {
    fn record(&mut self, acknowledgment: &Acknowledgment) {
        match acknowledgment {
            Acknowledgment::Ack => self.acked += 1,
            Acknowledgment::Requeue => self.requeued += 1,
            Acknowledgment::Discard => self.discarded += 1,
            Acknowledgment::DeadLetter { .. } => self.dead_lettered += 1,
        }
    }
}

/// Subscriber errors
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Consumes a queue with acknowledgment tied to persistence success
///
/// # Example
///
/// ```ignore
/// let subscriber = Arc::new(DurableSubscriber::new(queue, sink, SubscriberConfig::new("events")));
/// let handle = tokio::spawn({
///     let subscriber = subscriber.clone();
///     async move { subscriber.run().await }
/// });
///
/// shutdown_signal().await;
/// subscriber.shutdown();
/// let stats = handle.await??;
/// ```
pub struct DurableSubscriber {
    queue: Arc<dyn MessageQueue>,
    sink: Arc<dyn EventSink>,
    coordinator: DeliveryCoordinator,
    config: SubscriberConfig,
    stats: Mutex<SubscriberStats>,
    shutdown_tx: watch::Sender<bool>,
}

impl DurableSubscriber {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        sink: Arc<dyn EventSink>,
        config: SubscriberConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let coordinator =
            DeliveryCoordinator::new(queue.clone()).with_max_redeliveries(config.max_redeliveries);

        Self {
            queue,
            sink,
            coordinator,
            config,
            stats: Mutex::new(SubscriberStats::default()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Counters so far
    pub fn stats(&self) -> SubscriberStats {
        *self.stats.lock()
    }

    /// Ask the loop to stop after the in-flight delivery is settled
    pub fn shutdown(&self) {
        info!(consumer_id = %self.config.consumer_id, "Subscriber shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Run the pull loop until [`shutdown`](Self::shutdown) is called
    #[instrument(skip(self), fields(queue = %self.config.queue_name, consumer_id = %self.config.consumer_id))]
    pub async fn run(&self) -> Result<SubscriberStats, SubscriberError> {
        let mut poller = DeliveryPoller::new(
            self.queue.clone(),
            self.config.queue_name.clone(),
            LeaseSettings {
                consumer_id: self.config.consumer_id.clone(),
                prefetch: self.config.prefetch,
                lease: self.config.lease,
            },
            self.config.poller.clone(),
            self.shutdown_tx.subscribe(),
        );

        // Pick up anything a previous run under this id or a crashed consumer left leased
        self.release_held().await?;
        self.reclaim_expired().await?;
        let mut last_reclaim = Instant::now();

        info!("Subscriber started");

        while !poller.is_shutdown() {
            if last_reclaim.elapsed() >= self.config.reclaim_interval {
                if let Err(e) = self.reclaim_expired().await {
                    error!(error = %e, "Failed to reclaim expired leases");
                }
                last_reclaim = Instant::now();
            }

            match poller.poll().await {
                Ok(Some(delivery)) => {
                    let outcome = self.process(&delivery).await;
                    match self.coordinator.settle(&delivery, outcome).await {
                        Ok(Acknowledgment::Requeue) => {
                            self.stats.lock().record(&Acknowledgment::Requeue);
                            poller.back_off();
                        }
                        Ok(acknowledgment) => {
                            self.stats.lock().record(&acknowledgment);
                            poller.reset_backoff();
                            continue;
                        }
                        Err(_) => poller.back_off(),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to fetch delivery");
                    poller.back_off();
                }
            }

            if poller.wait().await {
                break;
            }
        }

        let stats = self.stats();
        info!(
            acked = stats.acked,
            requeued = stats.requeued,
            discarded = stats.discarded,
            dead_lettered = stats.dead_lettered,
            "Subscriber stopped"
        );
        Ok(stats)
    }

    /// Decode, stamp and persist one delivery
    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, delivery_count = delivery.delivery_count))]
    pub async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        let event = match Event::from_wire(&delivery.body) {
            Ok(event) => event,
            Err(e) => return DeliveryOutcome::Malformed(e),
        };

        let record = event.into_record(Utc::now());
        let timeout = self.config.persist_timeout;

        match tokio::time::timeout(timeout, self.sink.persist(&record)).await {
            Ok(Ok(())) => {
                debug!(device = %record.device, "Event persisted");
                DeliveryOutcome::Persisted
            }
            Ok(Err(e)) => DeliveryOutcome::PersistFailed(e),
            Err(_) => DeliveryOutcome::PersistFailed(PersistError::Timeout(timeout)),
        }
    }

    async fn release_held(&self) -> Result<(), QueueError> {
        let released = self
            .queue
            .release_held(&self.config.queue_name, &self.config.consumer_id)
            .await?;
        if !released.is_empty() {
            info!(count = released.len(), "Returned leases held under this consumer id");
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<(), QueueError> {
        let reclaimed = self.queue.reclaim_expired(&self.config.queue_name).await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "Returned expired leases to the queue");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryEventSink;
    use crate::queue::{InMemoryMessageQueue, OutgoingMessage};
    use relay_core::WIRE_CONTENT_TYPE;

    struct Harness {
        queue: Arc<InMemoryMessageQueue>,
        sink: Arc<InMemoryEventSink>,
        subscriber: Arc<DurableSubscriber>,
    }

    fn harness(config: SubscriberConfig) -> Harness {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let sink = Arc::new(InMemoryEventSink::new());
        let subscriber = Arc::new(DurableSubscriber::new(queue.clone(), sink.clone(), config));
        Harness {
            queue,
            sink,
            subscriber,
        }
    }

    fn config() -> SubscriberConfig {
        SubscriberConfig::new("events").with_consumer_id("consumer-test")
    }

    async fn enqueue(queue: &InMemoryMessageQueue, body: &[u8]) {
        queue
            .publish("events", OutgoingMessage::persistent(body.to_vec(), WIRE_CONTENT_TYPE))
            .await
            .unwrap();
    }

    async fn enqueue_event(queue: &InMemoryMessageQueue, event: &Event) {
        enqueue(queue, &event.to_wire().unwrap()).await;
    }

    /// Poll until `done` holds, advancing the paused clock between checks
    async fn until(mut done: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_default_config() {
        let config = SubscriberConfig::new("events");
        assert_eq!(config.prefetch, 1);
        assert_eq!(config.persist_timeout, Duration::from_secs(5));
        assert_eq!(config.lease, Duration::from_secs(30));
        assert_eq!(config.max_redeliveries, None);
        assert!(config.consumer_id.starts_with("consumer-"));
    }

    #[test_log::test(tokio::test)]
    async fn test_process_stamps_persistence_time() {
        let h = harness(config());
        let event = Event::new("sensor-1", "linux", "temp").with_value("21.5");
        enqueue_event(&h.queue, &event).await;
        let delivery = h.queue.fetch("events", "c", 1, Duration::from_secs(30)).await.unwrap().unwrap();

        let before = Utc::now();
        let outcome = h.subscriber.process(&delivery).await;
        let after = Utc::now();

        assert!(matches!(outcome, DeliveryOutcome::Persisted));
        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device, "sensor-1");
        assert_eq!(records[0].value.as_deref(), Some("21.5"));
        assert!(records[0].timestamp >= before && records[0].timestamp <= after);
    }

    #[tokio::test]
    async fn test_process_malformed_payload() {
        let h = harness(config());
        enqueue(&h.queue, b"{\"device\":").await;
        let delivery = h.queue.fetch("events", "c", 1, Duration::from_secs(30)).await.unwrap().unwrap();

        let outcome = h.subscriber.process(&delivery).await;

        assert!(matches!(outcome, DeliveryOutcome::Malformed(_)));
        assert_eq!(h.sink.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_times_out_slow_store() {
        let h = harness(config());
        h.sink.set_latency(Some(Duration::from_secs(6)));
        enqueue_event(&h.queue, &Event::new("d", "linux", "temp")).await;
        let delivery = h.queue.fetch("events", "c", 1, Duration::from_secs(30)).await.unwrap().unwrap();

        let outcome = h.subscriber.process(&delivery).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::PersistFailed(PersistError::Timeout(t)) if t == Duration::from_secs(5)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_persists_discards_and_stops() {
        let h = harness(config());
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;
        enqueue(&h.queue, b"not json").await;
        enqueue(&h.queue, br#"{"device":"d","os":"linux"}"#).await;
        enqueue_event(&h.queue, &Event::new("sensor-2", "linux", "temp")).await;

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let queue = h.queue.clone();
        until(|| queue.message_count() == 0).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert_eq!(stats.acked, 2);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.requeued, 0);
        let devices: Vec<_> = h.sink.records().into_iter().map(|r| r.device).collect();
        assert_eq!(devices, vec!["sensor-1", "sensor-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_requeues_until_recovery() {
        let h = harness(config());
        h.sink.set_available(false);
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let sink = h.sink.clone();
        until(|| sink.attempt_count() >= 3).await;
        assert_eq!(h.queue.message_count(), 1);
        assert!(h.sink.is_empty());

        h.sink.set_available(true);
        let queue = h.queue.clone();
        until(|| queue.message_count() == 0).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert!(stats.requeued >= 2);
        assert_eq!(stats.acked, 1);
        assert_eq!(h.sink.len(), 1);
        assert!(h.queue.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letters_after_max_redeliveries() {
        let h = harness(config().with_max_redeliveries(Some(2)));
        h.sink.set_rejecting(true);
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let queue = h.queue.clone();
        until(|| queue.message_count() == 0).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert_eq!(stats.requeued, 2);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(h.sink.attempt_count(), 3);
        assert_eq!(h.queue.dead_letters()[0].delivery_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaims_lease_left_by_dead_consumer() {
        let h = harness(config().with_reclaim_interval(Duration::from_secs(1)));
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;

        // Another consumer leases the message and never settles it
        let abandoned = h
            .queue
            .fetch("events", "crashed", 1, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let queue = h.queue.clone();
        until(|| queue.message_count() == 0).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert_eq!(stats.acked, 1);
        assert_eq!(h.sink.len(), 1);
        assert!(h.queue.delivery_count(abandoned.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_under_same_id_recovers_unexpired_lease() {
        // Reclaim sweeps alone would not free this lease for a long time
        let h = harness(config().with_reclaim_interval(Duration::from_secs(3_600)));
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;

        // A previous run under the same id died holding the message
        h.queue
            .fetch("events", "consumer-test", 1, Duration::from_secs(3_600))
            .await
            .unwrap()
            .unwrap();

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let queue = h.queue.clone();
        until(|| queue.message_count() == 0).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert_eq!(stats.acked, 1);
        assert_eq!(h.sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_write() {
        let h = harness(config());
        h.sink.set_latency(Some(Duration::from_secs(2)));
        enqueue_event(&h.queue, &Event::new("sensor-1", "linux", "temp")).await;

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });

        let sink = h.sink.clone();
        until(|| sink.attempt_count() == 1).await;
        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();

        assert_eq!(stats.acked, 1);
        assert_eq!(h.sink.len(), 1);
        assert_eq!(h.queue.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_idle() {
        let h = harness(config());

        let subscriber = h.subscriber.clone();
        let handle = tokio::spawn(async move { subscriber.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.subscriber.shutdown();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, SubscriberStats::default());
    }

    #[test_log::test(tokio::test)]
    async fn test_run_fails_when_broker_unreachable_at_start() {
        let h = harness(config());
        h.queue.set_unavailable(true);

        let err = h.subscriber.run().await.unwrap_err();
        assert!(matches!(err, SubscriberError::Queue(QueueError::Database(_))));
    }
}
