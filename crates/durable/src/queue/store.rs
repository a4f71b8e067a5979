//! MessageQueue trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Error type for broker operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The delivery is no longer held under this lease (settled, reclaimed or re-leased)
    #[error("delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A message to be enqueued
///
/// Every enqueued message is durable; there is no transient mode.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl OutgoingMessage {
    /// A persistent message with the given body and content type
    pub fn persistent(body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            body,
            content_type: content_type.into(),
        }
    }
}

/// A message leased to one consumer until it is acked or nacked
///
/// `consumer_id` and `delivery_count` identify the lease: settling a
/// delivery whose lease was reclaimed and handed out again fails with
/// [`QueueError::DeliveryNotFound`] instead of touching the new lease.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub queue_name: String,
    pub consumer_id: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// How many times the message has been delivered, including this one
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    /// Number of earlier deliveries that ended in a requeue or an expired lease
    pub fn redelivery_count(&self) -> u32 {
        self.delivery_count.saturating_sub(1)
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Durable FIFO queue with per-consumer prefetch and explicit acknowledgment
///
/// Implementations must be thread-safe: the ingress publishes concurrently
/// from many request handlers through one shared instance.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Create the backing structures if they do not exist
    async fn declare(&self) -> Result<(), QueueError>;

    /// Durably enqueue a message, returning its id
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<Uuid, QueueError>;

    /// Lease the oldest ready message to `consumer_id`
    ///
    /// Returns `None` when the queue is empty or when the consumer already
    /// holds `prefetch` unacknowledged deliveries.
    async fn fetch(
        &self,
        queue: &str,
        consumer_id: &str,
        prefetch: u32,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Permanently remove a delivered message
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivered message; `requeue` returns it to the queue, otherwise it is dropped
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Move a delivered message to the dead-letter table
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Return deliveries with expired leases to the queue
    async fn reclaim_expired(&self, queue: &str) -> Result<Vec<Uuid>, QueueError>;

    /// Return every delivery leased to `consumer_id` to the queue, expired or not
    ///
    /// A consumer restarting under a fixed id calls this before its first
    /// fetch; otherwise its own orphaned leases count against its prefetch.
    async fn release_held(&self, queue: &str, consumer_id: &str) -> Result<Vec<Uuid>, QueueError>;
}
