//! In-memory implementation of MessageQueue for testing

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use super::store::*;

/// Internal message state
enum MessageStatus {
    Ready,
    Delivered {
        consumer_id: String,
        lease_expires_at: Instant,
    },
}

struct StoredMessage {
    id: Uuid,
    queue_name: String,
    body: Vec<u8>,
    content_type: String,
    delivery_count: u32,
    enqueued_at: DateTime<Utc>,
    status: MessageStatus,
}

/// A message moved out of the queue by [`MessageQueue::dead_letter`]
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub queue_name: String,
    pub body: Vec<u8>,
    pub delivery_count: u32,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

/// In-memory implementation of MessageQueue
///
/// Same semantics as the PostgreSQL queue: FIFO per queue, requeued messages
/// keep their original position, leases expire on the tokio clock (so paused
/// test time drives them).
///
/// # Example
///
/// ```
/// use relay_durable::InMemoryMessageQueue;
///
/// let queue = InMemoryMessageQueue::new();
/// assert_eq!(queue.message_count(), 0);
/// ```
pub struct InMemoryMessageQueue {
    messages: RwLock<Vec<StoredMessage>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    published: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryMessageQueue {
    /// Create a new in-memory queue
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            dead_letters: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a broker outage: every operation fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Messages still owned by the queue (ready or delivered)
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    /// Messages currently leased to a consumer
    pub fn in_flight_count(&self) -> usize {
        self.messages
            .read()
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Delivered { .. }))
            .count()
    }

    /// Total successful publishes since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Snapshot of the dead-letter table
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().clone()
    }

    /// Delivery count of a message still in the queue
    pub fn delivery_count(&self, message_id: Uuid) -> Option<u32> {
        self.messages
            .read()
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.delivery_count)
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::Database("broker unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Index of the message still held under `delivery`'s lease
    fn held_index(messages: &[StoredMessage], delivery: &Delivery) -> Result<usize, QueueError> {
        messages
            .iter()
            .position(|m| {
                m.id == delivery.id
                    && m.delivery_count == delivery.delivery_count
                    && matches!(&m.status, MessageStatus::Delivered { consumer_id, .. } if *consumer_id == delivery.consumer_id)
            })
            .ok_or(QueueError::DeliveryNotFound(delivery.id))
    }

    /// Remove a held message, returning it
    fn take_held(&self, delivery: &Delivery) -> Result<StoredMessage, QueueError> {
        let mut messages = self.messages.write();
        let index = Self::held_index(&messages, delivery)?;
        Ok(messages.remove(index))
    }

    /// Return every delivered message in `queue` matching `predicate` to the ready state
    fn release_where<F>(&self, queue: &str, predicate: F) -> Vec<Uuid>
    where
        F: Fn(&str, Instant) -> bool,
    {
        let mut released = Vec::new();
        for message in self.messages.write().iter_mut() {
            if message.queue_name != queue {
                continue;
            }
            let release = match &message.status {
                MessageStatus::Delivered {
                    consumer_id,
                    lease_expires_at,
                } => predicate(consumer_id, *lease_expires_at),
                MessageStatus::Ready => false,
            };
            if release {
                message.status = MessageStatus::Ready;
                released.push(message.id);
            }
        }
        released
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn declare(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<Uuid, QueueError> {
        self.check_available()?;

        let id = Uuid::now_v7();
        self.messages.write().push(StoredMessage {
            id,
            queue_name: queue.to_string(),
            body: message.body,
            content_type: message.content_type,
            delivery_count: 0,
            enqueued_at: Utc::now(),
            status: MessageStatus::Ready,
        });
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn fetch(
        &self,
        queue: &str,
        consumer_id: &str,
        prefetch: u32,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        self.check_available()?;

        let mut messages = self.messages.write();

        let held = messages
            .iter()
            .filter(|m| {
                m.queue_name == queue
                    && matches!(&m.status, MessageStatus::Delivered { consumer_id: c, .. } if c == consumer_id)
            })
            .count();
        if held >= prefetch as usize {
            return Ok(None);
        }

        let Some(message) = messages
            .iter_mut()
            .find(|m| m.queue_name == queue && matches!(m.status, MessageStatus::Ready))
        else {
            return Ok(None);
        };

        message.delivery_count += 1;
        message.status = MessageStatus::Delivered {
            consumer_id: consumer_id.to_string(),
            lease_expires_at: Instant::now() + lease,
        };

        Ok(Some(Delivery {
            id: message.id,
            queue_name: message.queue_name.clone(),
            consumer_id: consumer_id.to_string(),
            body: message.body.clone(),
            content_type: message.content_type.clone(),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_available()?;
        self.take_held(delivery).map(|_| ())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.check_available()?;

        if !requeue {
            return self.take_held(delivery).map(|_| ());
        }

        let mut messages = self.messages.write();
        let index = Self::held_index(&messages, delivery)?;
        messages[index].status = MessageStatus::Ready;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.check_available()?;

        let message = self.take_held(delivery)?;
        self.dead_letters.write().push(DeadLetter {
            message_id: message.id,
            queue_name: message.queue_name,
            body: message.body,
            delivery_count: message.delivery_count,
            reason: reason.to_string(),
            dead_at: Utc::now(),
        });
        Ok(())
    }

    async fn reclaim_expired(&self, queue: &str) -> Result<Vec<Uuid>, QueueError> {
        self.check_available()?;

        let now = Instant::now();
        Ok(self.release_where(queue, |_, lease_expires_at| lease_expires_at <= now))
    }

    async fn release_held(&self, queue: &str, consumer_id: &str) -> Result<Vec<Uuid>, QueueError> {
        self.check_available()?;

        Ok(self.release_where(queue, |holder, _| holder == consumer_id))
    }
}
