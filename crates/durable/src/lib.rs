//! # Durable Delivery Pipeline
//!
//! At-least-once delivery of telemetry events from a producer to an event store
//! through a durable queue.
//!
//! ## Features
//!
//! - **Connection resilience**: bounded retries with a reusable [`RetryPolicy`]
//! - **Durable queue**: publish, lease, ack and nack over PostgreSQL (or in memory);
//!   a settle only applies while the caller still holds the lease
//! - **Prefetch of one**: a consumer never holds more than one unacknowledged message
//! - **Acknowledgment tied to persistence**: ack only after the store confirms the write
//! - **Optional dead-lettering**: cap redeliveries when a store outage must not loop forever
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   publish    ┌──────────────────────────┐
//! │ DurablePublisher │ ───────────► │       MessageQueue       │
//! └──────────────────┘              │ (relay_queue_messages)   │
//!                                   └──────────────────────────┘
//!                                                │ fetch (prefetch = 1)
//!                                                ▼
//! ┌──────────────────┐   persist    ┌──────────────────────────┐
//! │    EventSink     │ ◄─────────── │    DurableSubscriber     │
//! └──────────────────┘              └──────────────────────────┘
//!                                                │ outcome
//!                                                ▼
//!                                   ┌──────────────────────────┐
//!                                   │   DeliveryCoordinator    │
//!                                   │ (ack / requeue / discard)│
//!                                   └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use relay_durable::{ConnectionManager, DurablePublisher, MessageQueue, PostgresMessageQueue, RetryPolicy};
//!
//! let manager = ConnectionManager::new(RetryPolicy::connection_default());
//! let pool = manager.connect_postgres("broker", &broker_url, 5).await?;
//! let queue = Arc::new(PostgresMessageQueue::new(pool));
//! queue.declare().await?;
//!
//! let publisher = DurablePublisher::new(queue.clone(), "events");
//! publisher.publish(&event).await?;
//! ```

pub mod persistence;
pub mod publisher;
pub mod queue;
pub mod reliability;
pub mod worker;

// Re-export key types at crate root
pub use persistence::{EventSink, InMemoryEventSink, PersistError, PostgresEventSink};
pub use publisher::{DurablePublisher, PublishAck, PublishError};
pub use queue::{
    DeadLetter, Delivery, InMemoryMessageQueue, MessageQueue, OutgoingMessage,
    PostgresMessageQueue, QueueError,
};
pub use reliability::{ConnectError, ConnectionManager, RetryPolicy};
pub use worker::{
    Acknowledgment, DeliveryCoordinator, DeliveryOutcome, DurableSubscriber, PollerConfig,
    SubscriberConfig, SubscriberError, SubscriberStats,
};
