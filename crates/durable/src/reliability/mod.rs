//! Reliability patterns for the delivery pipeline
//!
//! This module provides:
//! - [`RetryPolicy`] - Bounded retry schedule (fixed interval by default)
//! - [`ConnectionManager`] - Connect-with-retry for the broker and the store

mod connect;
mod retry;

pub use connect::{ConnectError, ConnectionManager};
pub use retry::RetryPolicy;
