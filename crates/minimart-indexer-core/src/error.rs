//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, decoding or persisting events.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Upstream log source failure (network, rate limit, bad response).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Durable store failure (connect, query, transaction).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A raw log could not be decoded into an event record.
    #[error("Decode error in tx {tx_hash} log {log_index}: {reason}")]
    Decode {
        tx_hash: String,
        log_index: String,
        reason: String,
    },

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A scan window was planned with `to < from`.
    #[error("Invalid scan window [{from}, {to}]")]
    InvalidWindow { from: u64, to: u64 },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for errors on the read path, which end the process
    /// instead of being retried in place.
    pub fn is_fatal_upstream(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Decode { .. })
    }

    /// Returns `true` for durable store failures.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Build a [`IndexerError::Decode`] for the log at `(tx_hash, log_index)`.
    pub fn decode(
        tx_hash: impl Into<String>,
        log_index: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Decode {
            tx_hash: tx_hash.into(),
            log_index: log_index.to_string(),
            reason: reason.into(),
        }
    }
}
