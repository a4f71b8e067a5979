//! Consumer side of the pipeline
//!
//! This module provides:
//! - [`DurableSubscriber`] - Pull loop with prefetch of one and graceful shutdown
//! - [`DeliveryCoordinator`] - Outcome to acknowledgment decision table
//! - [`DeliveryPoller`] - Fetching with exponential backoff when idle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    DurableSubscriber                      │
//! │  ┌──────────────┐   ┌─────────────┐   ┌───────────────┐  │
//! │  │DeliveryPoller│──►│   process   │──►│  Coordinator  │  │
//! │  │ (prefetch 1) │   │ decode+sink │   │ ack/nack/DLQ  │  │
//! │  └──────────────┘   └─────────────┘   └───────────────┘  │
//! │         ▲                                     │          │
//! │         └──────── back off on requeue ◄───────┘          │
//! │  ┌──────────────────────────────┐                        │
//! │  │ Lease reclaimer (30s)        │                        │
//! │  └──────────────────────────────┘                        │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod coordinator;
mod poller;
mod subscriber;

pub use coordinator::{Acknowledgment, DeliveryCoordinator, DeliveryOutcome};
pub use poller::{DeliveryPoller, LeaseSettings, PollerConfig};
pub use subscriber::{DurableSubscriber, SubscriberConfig, SubscriberError, SubscriberStats};
