//! FIFO buffers between the scanner and the write coordinator.
//!
//! The same type backs both the intake queue and the dead-letter area. Clones
//! share the underlying buffer, so the orchestrator can hand one handle to the
//! scanner and another to the coordinator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::EventRecord;

/// Unbounded, ordered queue of event records.
#[derive(Clone, Default)]
pub struct EventQueue {
    name: &'static str,
    items: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl EventQueue {
    /// Create an empty queue; `name` is used in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Arc::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append records to the tail, preserving their order.
    pub fn enqueue(&self, records: impl IntoIterator<Item = EventRecord>) {
        self.lock().extend(records);
    }

    /// Remove and return up to `max` records from the head.
    pub fn drain(&self, max: usize) -> Vec<EventRecord> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Lowest block number among the queued records.
    pub fn lowest_block(&self) -> Option<u64> {
        self.lock().iter().map(|r| r.block_number).min()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventRecord>> {
        // A panic mid-push leaves the deque structurally valid.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
