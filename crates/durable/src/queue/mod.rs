//! Durable message queue
//!
//! This module provides:
//! - [`MessageQueue`] trait - broker abstraction used by the publisher and the subscriber
//! - [`PostgresMessageQueue`] - PostgreSQL-backed implementation
//! - [`InMemoryMessageQueue`] - In-memory implementation for testing

mod memory;
mod postgres;
mod store;

pub use memory::{DeadLetter, InMemoryMessageQueue};
pub use postgres::PostgresMessageQueue;
pub use store::*;
