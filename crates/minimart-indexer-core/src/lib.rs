//! minimart-indexer-core: foundation for the MiniMart event ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! ChainScanner ──enqueue──► EventQueue (intake)
//!                                │ drain ≤ batch_size
//!                                ▼
//!                         WriteCoordinator ──► BatchWriter ──► events table
//!                           │        ▲                            │
//!                  exhausted│        │dead-letter tick            │ MAX(block_number)
//!                           ▼        │                            ▼
//!                    EventQueue (dead-letter)              CursorStore → Cursor
//! ```
//!
//! This crate holds the source-agnostic pieces; RPC access and the scanner
//! live in `minimart-indexer-evm`, SQL backends in `minimart-indexer-storage`.

pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod indexer;
pub mod queue;
pub mod retry;
pub mod types;
pub mod window;
pub mod writer;

pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, CycleOutcome, QueueSource, SkipReason, WriteCoordinator,
    WriteCycleState,
};
pub use cursor::{determine_resume_position, Cursor, CursorStore, ResumeOrigin};
pub use error::IndexerError;
pub use indexer::{IndexerConfig, IndexerState};
pub use queue::EventQueue;
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{EventRecord, IndexPhase, MiniMartEvent};
pub use window::{ScanWindow, WindowPlanner};
pub use writer::BatchWriter;
