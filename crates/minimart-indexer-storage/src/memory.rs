//! In-memory storage backend.
//!
//! Keeps committed event records in RAM with the same uniqueness and
//! all-or-nothing semantics as the SQL backends. Useful for tests and
//! short-lived runs that don't need persistence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::B256;
use async_trait::async_trait;

use minimart_indexer_core::cursor::CursorStore;
use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::types::EventRecord;
use minimart_indexer_core::writer::BatchWriter;

#[derive(Default)]
struct Table {
    rows: Vec<EventRecord>,
    keys: HashSet<(B256, u32)>,
}

/// In-memory event store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch writes fail before touching any row.
    pub fn fail_next_writes(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// All committed records in insertion order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.table().rows.clone()
    }

    /// Total number of committed records.
    pub fn event_count(&self) -> usize {
        self.table().rows.len()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BatchWriter for MemoryStore {
    async fn write_batch(&self, records: &[EventRecord]) -> Result<u64, IndexerError> {
        if self.take_failure() {
            return Err(IndexerError::Storage("injected write failure".into()));
        }

        let mut table = self.table();
        let mut inserted = 0u64;
        for record in records {
            if table.keys.insert(record.identity()) {
                table.rows.push(record.clone());
                inserted += 1;
            }
        }
        tracing::debug!(records = records.len(), inserted, "memory batch committed");
        Ok(inserted)
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn max_committed_block(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.table().rows.iter().map(|r| r.block_number).max())
    }
}
