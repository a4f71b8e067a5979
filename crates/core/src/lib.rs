// Telemetry Relay Core
//
// This crate provides the storage-agnostic building blocks shared by the
// ingress (producer) and worker (consumer) sides of the relay.
//
// Key design decisions:
// - Event is the wire representation; EventRecord is the storage representation
// - Validation happens once at the ingress boundary and again on decode
// - Timestamps are assigned by the consumer, never taken from producers
// - Configuration errors are typed so binaries can fail fast with context

pub mod config;
pub mod events;
pub mod shutdown;

// Telemetry (tracing subscriber + optional OTLP export)
pub mod telemetry;

// Re-exports for convenience
pub use config::{BrokerConfig, ConfigError, RetryConfig, StoreConfig};
pub use events::{DecodeError, Event, EventRecord, ValidationError, WIRE_CONTENT_TYPE};
pub use shutdown::shutdown_signal;
