//! In-memory implementation of EventSink for testing

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::EventRecord;

use super::store::*;

/// In-memory implementation of EventSink
///
/// Failure modes can be toggled at runtime to exercise the consumer's
/// requeue path: an unavailable sink fails with a connectivity error, a
/// rejecting sink refuses writes, and a latency delays every write.
pub struct InMemoryEventSink {
    records: RwLock<Vec<EventRecord>>,
    attempts: AtomicU64,
    available: AtomicBool,
    rejecting: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            attempts: AtomicU64::new(0),
            available: AtomicBool::new(true),
            rejecting: AtomicBool::new(false),
            latency: RwLock::new(None),
        }
    }

    /// Delay every write by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Records persisted so far, in insertion order
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of persist calls, successful or not
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn declare(&self) -> Result<(), PersistError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistError::Connectivity("sink unavailable".to_string()));
        }
        Ok(())
    }

    async fn persist(&self, record: &EventRecord) -> Result<(), PersistError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistError::Connectivity("sink unavailable".to_string()));
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(PersistError::Rejected("write refused".to_string()));
        }

        self.records.write().push(record.clone());
        Ok(())
    }
}
