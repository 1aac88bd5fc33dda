//! SQLite storage backend for the MiniMart indexer.
//!
//! Persists event records to a single SQLite file (or an in-memory database
//! for tests). `block_number` is an `INTEGER` column bound from decimal text,
//! so SQLite's type affinity stores it numerically and `MAX` compares numbers,
//! not strings.
//!
//! # Usage
//! ```rust,no_run
//! use minimart_indexer_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./minimart.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use minimart_indexer_core::cursor::CursorStore;
use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::types::EventRecord;
use minimart_indexer_core::writer::BatchWriter;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed event store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./minimart.db"`) or a full
    /// SQLite URL (`"sqlite:./minimart.db?mode=rwc"`). `sqlite::memory:`
    /// is routed to [`SqliteStore::in_memory`].
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        if matches!(path, ":memory:" | "sqlite::memory:") {
            return Self::in_memory().await;
        }

        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(url = %url, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection to `:memory:` would get its own database, so
    /// the pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the events table and its indexes.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                event_name       TEXT    NOT NULL,
                args             TEXT,
                block_number     INTEGER NOT NULL,
                transaction_hash TEXT    NOT NULL,
                log_index        INTEGER NOT NULL,
                UNIQUE (transaction_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!("sqlite schema ready");
        Ok(())
    }

    /// Number of stored event rows.
    pub async fn event_count(&self) -> Result<u64, IndexerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    /// Returns a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl BatchWriter for SqliteStore {
    async fn write_batch(&self, records: &[EventRecord]) -> Result<u64, IndexerError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(records.len());
        for r in records {
            rows.push((
                r.event_name(),
                r.args_text()?,
                r.block_number_text(),
                r.transaction_hash_hex(),
                r.log_index,
            ));
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO events (event_name, args, block_number, transaction_hash, log_index) ",
        );
        qb.push_values(rows, |mut b, (name, args, block, tx, log_index)| {
            b.push_bind(name)
                .push_bind(args)
                .push_bind(block)
                .push_bind(tx)
                .push_bind(i64::from(log_index));
        });
        qb.push(" ON CONFLICT (transaction_hash, log_index) DO NOTHING");

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let result = qb.build().execute(&mut *tx).await.map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        debug!(records = records.len(), inserted = result.rows_affected(), "sqlite batch committed");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn max_committed_block(&self) -> Result<Option<u64>, IndexerError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        max.map(|b| {
            u64::try_from(b).map_err(|_| IndexerError::Storage(format!("negative block number {b}")))
        })
        .transpose()
    }
}
