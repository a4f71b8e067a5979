// Telemetry Relay Consumer Library
// Decision: Shared library for the consumer binary and its tests

pub mod config;
pub mod consumer;
pub mod health;

pub use config::ConsumerConfig;
pub use consumer::{ConsumerError, ConsumerWorker};
