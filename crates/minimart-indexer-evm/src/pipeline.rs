//! The pipeline: owns the queues, the scanner and the write tickers, and the
//! process lifetime that ties them together.
//!
//! ```text
//! run()
//!  ├── determine_resume_position()      (fatal on store failure)
//!  ├── spawn primary write ticker       ─┐ share one in-flight flag,
//!  ├── spawn dead-letter write ticker   ─┘ stop as soon as shutdown fires
//!  ├── scanner.backfill(resume)
//!  ├── scanner.live_tail(head)          (until shutdown or upstream error)
//!  └── stop tickers, wait for the in-flight write, log queue depths
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use minimart_indexer_core::coordinator::{CoordinatorStats, WriteCoordinator};
use minimart_indexer_core::cursor::{determine_resume_position, Cursor, CursorStore};
use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::indexer::{IndexerConfig, IndexerState};
use minimart_indexer_core::queue::EventQueue;

use crate::fetcher::EvmRpcClient;
use crate::scanner::{BackfillReport, ChainScanner};

/// Summary returned when the pipeline stops cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub resume: Cursor,
    /// `None` if shutdown arrived before backfill ran.
    pub backfill: Option<BackfillReport>,
    pub stats: CoordinatorStats,
    /// Records still queued at exit. The scan resumes from the highest
    /// committed block, so only those at or above it are read again on
    /// restart.
    pub intake_depth: usize,
    /// Batches that never committed. Records below the highest committed
    /// block are not re-scanned on restart; they are lost unless replayed
    /// from `lowest_dead_letter_block`.
    pub dead_letter_depth: usize,
    pub lowest_dead_letter_block: Option<u64>,
}

/// The ingestion pipeline for one contract.
pub struct Pipeline<C> {
    config: IndexerConfig,
    scanner: ChainScanner<C>,
    cursor_store: Arc<dyn CursorStore>,
    coordinator: Arc<WriteCoordinator>,
    state: Mutex<IndexerState>,
}

impl<C: EvmRpcClient + 'static> Pipeline<C> {
    pub fn new(
        config: IndexerConfig,
        scanner: ChainScanner<C>,
        cursor_store: Arc<dyn CursorStore>,
        coordinator: Arc<WriteCoordinator>,
    ) -> Self {
        Self {
            config,
            scanner,
            cursor_store,
            coordinator,
            state: Mutex::new(IndexerState::Idle),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn intake(&self) -> &EventQueue {
        self.coordinator.intake()
    }

    pub fn dead_letter(&self) -> &EventQueue {
        self.coordinator.dead_letter()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    fn set_state(&self, next: IndexerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "indexer state");
            *state = next;
        }
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    ///
    /// Upstream (RPC, decode) and startup store errors are returned; the
    /// caller exits non-zero. Write failures never surface here: the
    /// coordinator retries and dead-letters them.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<PipelineReport, IndexerError> {
        let store = self.cursor_store.as_ref();
        let resume = match determine_resume_position(store, self.config.genesis_block).await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.set_state(IndexerState::Error);
                tracing::error!(error = %e, "could not determine resume position");
                return Err(e);
            }
        };

        let writers = shutdown.child_token();
        let primary = tokio::spawn(self.coordinator.clone().run_primary(writers.clone()));
        let dead_letter = tokio::spawn(self.coordinator.clone().run_dead_letter(writers.clone()));

        let mut backfill = None;
        let scanned = self.scan(resume.block_number, &shutdown, &mut backfill).await;

        self.set_state(IndexerState::Stopping);
        writers.cancel();
        for (name, handle) in [("primary", primary), ("dead-letter", dead_letter)] {
            if let Err(e) = handle.await {
                tracing::error!(ticker = name, error = %e, "write ticker panicked");
            }
        }

        let report = PipelineReport {
            resume,
            backfill,
            stats: self.stats(),
            intake_depth: self.intake().len(),
            dead_letter_depth: self.dead_letter().len(),
            lowest_dead_letter_block: self.dead_letter().lowest_block(),
        };
        if let Some(lowest_block) = report.lowest_dead_letter_block {
            tracing::warn!(
                dead_letter_depth = report.dead_letter_depth,
                lowest_block,
                "stopping with unwritten dead-letter records; blocks below the resume position will not be re-scanned"
            );
        }
        tracing::info!(
            intake_depth = report.intake_depth,
            dead_letter_depth = report.dead_letter_depth,
            committed_batches = report.stats.committed_batches,
            records_written = report.stats.records_written,
            dead_lettered_batches = report.stats.dead_lettered_batches,
            "pipeline stopped"
        );

        match scanned {
            Ok(()) => {
                self.set_state(IndexerState::Stopped);
                Ok(report)
            }
            Err(e) => {
                self.set_state(IndexerState::Error);
                tracing::error!(error = %e, "scanner failed");
                Err(e)
            }
        }
    }

    async fn scan(
        &self,
        from: u64,
        shutdown: &CancellationToken,
        backfill: &mut Option<BackfillReport>,
    ) -> Result<(), IndexerError> {
        self.set_state(IndexerState::Backfilling);
        let report = self.scanner.backfill(from, shutdown).await?;
        *backfill = Some(report);
        if report.cancelled {
            return Ok(());
        }

        self.set_state(IndexerState::Live);
        self.scanner.live_tail(report.head, shutdown).await
    }
}
