//! Delivery polling with exponential backoff
//!
//! Fetches one delivery at a time with adaptive polling intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::queue::{Delivery, MessageQueue, QueueError};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when deliveries are flowing)
    pub min_interval: Duration,

    /// Maximum poll interval (when idle or when the store keeps failing)
    pub max_interval: Duration,

    /// Backoff multiplier applied on each empty poll or requeue
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Lease parameters passed to every fetch
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub consumer_id: String,
    pub prefetch: u32,
    pub lease: Duration,
}

/// Delivery poller with adaptive backoff
///
/// An empty poll grows the interval up to `max_interval`. The caller decides
/// when to reset it (a delivery was settled for good) or grow it further
/// (a delivery was requeued).
pub struct DeliveryPoller {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    lease: LeaseSettings,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl DeliveryPoller {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        queue_name: impl Into<String>,
        lease: LeaseSettings,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            lease,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Poll for the next delivery
    #[instrument(skip(self), fields(queue = %self.queue_name, consumer_id = %self.lease.consumer_id))]
    pub async fn poll(&mut self) -> Result<Option<Delivery>, QueueError> {
        if *self.shutdown_rx.borrow() {
            debug!("Poller shutdown requested");
            return Ok(None);
        }

        let delivery = self
            .queue
            .fetch(
                &self.queue_name,
                &self.lease.consumer_id,
                self.lease.prefetch,
                self.lease.lease,
            )
            .await?;

        match &delivery {
            Some(d) => debug!(delivery_id = %d.id, delivery_count = d.delivery_count, "Received delivery"),
            None => {
                self.back_off();
                trace!(
                    interval_ms = self.current_interval.as_millis(),
                    "No deliveries, backing off"
                );
            }
        }

        Ok(delivery)
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Reset backoff to minimum interval
    pub fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    /// Increase backoff interval
    pub fn back_off(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}
