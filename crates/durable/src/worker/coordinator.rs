//! Acknowledgment decisions for processed deliveries
//!
//! | Outcome                                  | Acknowledgment | Requeued |
//! |------------------------------------------|----------------|----------|
//! | Payload could not be decoded             | discard-nack   | no       |
//! | Record persisted                         | ack            | -        |
//! | Persistence failed                       | requeue-nack   | yes      |
//! | Persistence failed, redelivery cap hit   | dead-letter    | no       |
//!
//! Nothing retries locally: every retry is a full redelivery through the queue.

use std::sync::Arc;

use relay_core::DecodeError;
use tracing::{error, info, warn};

use crate::persistence::PersistError;
use crate::queue::{Delivery, MessageQueue, QueueError};

/// Result of processing one delivery
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The record was durably written
    Persisted,
    /// The payload can never be processed
    Malformed(DecodeError),
    /// The store did not confirm the write
    PersistFailed(PersistError),
}

/// Broker acknowledgment issued for a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    Ack,
    Requeue,
    Discard,
    DeadLetter { reason: String },
}

/// Maps delivery outcomes to broker acknowledgments and applies them
pub struct DeliveryCoordinator {
    queue: Arc<dyn MessageQueue>,
    max_redeliveries: Option<u32>,
}

impl DeliveryCoordinator {
    /// Coordinator with unbounded redelivery
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            max_redeliveries: None,
        }
    }

    /// Dead-letter a failing delivery once it has been redelivered `max` times
    pub fn with_max_redeliveries(mut self, max: Option<u32>) -> Self {
        self.max_redeliveries = max;
        self
    }

    pub fn decide(&self, delivery: &Delivery, outcome: &DeliveryOutcome) -> Acknowledgment {
        match outcome {
            DeliveryOutcome::Persisted => Acknowledgment::Ack,
            DeliveryOutcome::Malformed(_) => Acknowledgment::Discard,
            DeliveryOutcome::PersistFailed(e) => match self.max_redeliveries {
                Some(max) if delivery.redelivery_count() >= max => Acknowledgment::DeadLetter {
                    reason: format!(
                        "{} (after {} deliveries)",
                        e, delivery.delivery_count
                    ),
                },
                _ => Acknowledgment::Requeue,
            },
        }
    }

    /// Decide and apply the acknowledgment for `delivery`
    ///
    /// A failed acknowledgment is logged and returned; the delivery's lease
    /// eventually expires and the message is redelivered.
    pub async fn settle(
        &self,
        delivery: &Delivery,
        outcome: DeliveryOutcome,
    ) -> Result<Acknowledgment, QueueError> {
        let acknowledgment = self.decide(delivery, &outcome);

        match &outcome {
            DeliveryOutcome::Persisted => {}
            DeliveryOutcome::Malformed(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Failed to decode event, discarding");
            }
            DeliveryOutcome::PersistFailed(e) if e.is_connectivity() => {
                warn!(
                    delivery_id = %delivery.id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Store unavailable, event not persisted"
                );
            }
            DeliveryOutcome::PersistFailed(e) => {
                error!(
                    delivery_id = %delivery.id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Store rejected event"
                );
            }
        }

        let result = match &acknowledgment {
            Acknowledgment::Ack => self.queue.ack(delivery).await,
            Acknowledgment::Requeue => self.queue.nack(delivery, true).await,
            Acknowledgment::Discard => self.queue.nack(delivery, false).await,
            Acknowledgment::DeadLetter { reason } => {
                self.queue.dead_letter(delivery, reason).await
            }
        };

        match result {
            Ok(()) => {
                if let Acknowledgment::DeadLetter { reason } = &acknowledgment {
                    info!(delivery_id = %delivery.id, reason = %reason, "Moved event to dead-letter table");
                }
                Ok(acknowledgment)
            }
            Err(e) => {
                error!(
                    delivery_id = %delivery.id,
                    acknowledgment = ?acknowledgment,
                    error = %e,
                    "Failed to settle delivery, it will be redelivered after its lease expires"
                );
                Err(e)
            }
        }
    }
}
