//! Store selection by connection URL scheme.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use minimart_indexer_core::cursor::CursorStore;
use minimart_indexer_storage::{PostgresStore, SqliteStore};

/// A connected SQL backend.
pub enum Store {
    Sqlite(Arc<SqliteStore>),
    Postgres(Arc<PostgresStore>),
}

impl Store {
    /// Connect and bootstrap the schema.
    ///
    /// `sqlite:` URLs (or a bare `*.db` path) open SQLite; `postgres://` and
    /// `postgresql://` open Postgres.
    pub async fn connect(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let store = PostgresStore::connect(url)
                .await
                .context("connecting to postgres")?;
            return Ok(Self::Postgres(Arc::new(store)));
        }
        if url.starts_with("sqlite:") || url.ends_with(".db") {
            let store = SqliteStore::open(url).await.context("opening sqlite database")?;
            return Ok(Self::Sqlite(Arc::new(store)));
        }
        bail!("unsupported DATABASE_URL scheme (expected sqlite: or postgres://)")
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn max_committed_block(&self) -> Result<Option<u64>> {
        let max = match self {
            Self::Sqlite(s) => s.max_committed_block().await?,
            Self::Postgres(s) => s.max_committed_block().await?,
        };
        Ok(max)
    }

    pub async fn event_count(&self) -> Result<u64> {
        let count = match self {
            Self::Sqlite(s) => s.event_count().await?,
            Self::Postgres(s) => s.event_count().await?,
        };
        Ok(count)
    }
}
