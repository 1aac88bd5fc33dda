//! Resume cursor: where scanning restarts after a crash or redeploy.
//!
//! There is no checkpoint table. The highest committed `block_number` in the
//! events table *is* the cursor. Scanning resumes at that block rather than the
//! one after it: events in a block may have been split across write batches,
//! and re-ingesting the ones already stored is a no-op.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Read side of the durable store that the resume position is derived from.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// `MAX(block_number)` over committed events, or `None` if none exist.
    async fn max_committed_block(&self) -> Result<Option<u64>, IndexerError>;
}

/// Where the resume position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeOrigin {
    /// Derived from rows already in the store.
    Committed,
    /// No rows yet; starting at the configured genesis block.
    Genesis,
}

/// The block the scanner starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub block_number: u64,
    pub origin: ResumeOrigin,
}

impl Cursor {
    pub fn committed(block_number: u64) -> Self {
        Self {
            block_number,
            origin: ResumeOrigin::Committed,
        }
    }

    pub fn genesis(block_number: u64) -> Self {
        Self {
            block_number,
            origin: ResumeOrigin::Genesis,
        }
    }

    /// Returns `true` if prior indexing was found in the store.
    pub fn is_resumed(&self) -> bool {
        self.origin == ResumeOrigin::Committed
    }
}

/// Determine where scanning starts: the highest committed block if any,
/// otherwise `genesis_block`.
///
/// Store errors are returned as-is; the caller treats them as fatal.
pub async fn determine_resume_position<S>(
    store: &S,
    genesis_block: u64,
) -> Result<Cursor, IndexerError>
where
    S: CursorStore + ?Sized,
{
    let cursor = match store.max_committed_block().await? {
        Some(block) => Cursor::committed(block),
        None => Cursor::genesis(genesis_block),
    };

    if cursor.is_resumed() {
        tracing::info!(block = cursor.block_number, "prior indexing found, resuming");
    } else {
        tracing::info!(block = cursor.block_number, "no prior indexing, starting at genesis");
    }
    Ok(cursor)
}
