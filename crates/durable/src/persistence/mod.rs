//! Event persistence
//!
//! This module provides:
//! - [`EventSink`] trait - write side of the event store
//! - [`PostgresEventSink`] - PostgreSQL-backed implementation
//! - [`InMemoryEventSink`] - In-memory implementation for testing

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryEventSink;
pub use postgres::PostgresEventSink;
pub use store::*;
