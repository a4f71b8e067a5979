//! EventSink trait definition

use std::time::Duration;

use async_trait::async_trait;
use relay_core::EventRecord;

/// Why a record was not persisted
///
/// Every variant is transient from the consumer's point of view: the message
/// is requeued and retried. The distinction only matters for logs and for
/// the dead-letter reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistError {
    /// The store could not be reached
    #[error("store unreachable: {0}")]
    Connectivity(String),

    /// The store was reached but refused the write
    #[error("store rejected write: {0}")]
    Rejected(String),

    /// No confirmation arrived in time
    #[error("store write timed out after {0:?}")]
    Timeout(Duration),
}

impl PersistError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_))
    }
}

impl From<sqlx::Error> for PersistError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connectivity(e.to_string()),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Write side of the event store
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Create the target table if it does not exist
    async fn declare(&self) -> Result<(), PersistError>;

    /// Insert one record, returning only after the store confirmed it
    async fn persist(&self, record: &EventRecord) -> Result<(), PersistError>;
}
