// HTTP API routes
//
// POST /events publishes validated events to the durable queue.
// GET /health is an unconditional liveness probe.

pub mod events;
pub mod health;

pub use events::{AcceptedResponse, EventRequest};

use relay_durable::DurablePublisher;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub publisher: DurablePublisher,
}

impl AppState {
    pub fn new(publisher: DurablePublisher) -> Self {
        Self { publisher }
    }
}
