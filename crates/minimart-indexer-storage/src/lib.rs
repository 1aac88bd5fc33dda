//! minimart-indexer-storage: storage backends for the MiniMart indexer.
//!
//! Every backend implements both [`BatchWriter`] (idempotent, atomic batch
//! insert into `events`) and [`CursorStore`] (`MAX(block_number)` for resume).
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (`sqlite` feature)
//! - `postgres`: PostgreSQL via `sqlx` (`postgres` feature)
//!
//! [`BatchWriter`]: minimart_indexer_core::writer::BatchWriter
//! [`CursorStore`]: minimart_indexer_core::cursor::CursorStore

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
