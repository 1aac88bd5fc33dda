//! The persistence seam: anything that can commit a batch of records.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::EventRecord;

/// Commits event records atomically and idempotently.
///
/// Implementations must write the whole batch in one transaction, treat a
/// repeated `(transaction_hash, log_index)` as a no-op, and leave none of the
/// batch behind when they return an error.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Write `records`, returning how many rows were newly inserted.
    async fn write_batch(&self, records: &[EventRecord]) -> Result<u64, IndexerError>;
}

#[async_trait]
impl<T: BatchWriter + ?Sized> BatchWriter for Arc<T> {
    async fn write_batch(&self, records: &[EventRecord]) -> Result<u64, IndexerError> {
        (**self).write_batch(records).await
    }
}
