//! Indexer configuration and state types.

use std::time::Duration;

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::error::IndexerError;
use crate::retry::RetryConfig;

/// MiniMart deployment on Base Sepolia.
pub const DEFAULT_CONTRACT_ADDRESS: Address = address!("D752F23C1C5b82c1b749ff048B7edc0b70AC5C5A");

/// Block the MiniMart contract was deployed at; nothing earlier is scanned.
pub const DEFAULT_GENESIS_BLOCK: u64 = 32_908_523;

/// Upper bound on `write_batch_size`, keeping a single INSERT well under
/// driver bind-parameter limits (five binds per row).
pub const MAX_WRITE_BATCH_SIZE: usize = 1000;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Contract whose logs are ingested.
    pub contract_address: Address,
    /// First block to scan when the store is empty.
    pub genesis_block: u64,
    /// Maximum blocks per `eth_getLogs` window.
    pub max_window_span: u64,
    /// Maximum records per write cycle.
    pub write_batch_size: usize,
    /// Primary write ticker period (milliseconds).
    pub write_interval_ms: u64,
    /// Dead-letter ticker period (milliseconds).
    pub dead_letter_interval_ms: u64,
    /// Total write attempts per batch before dead-lettering.
    pub max_write_attempts: u32,
    /// Fixed delay between write attempts (milliseconds).
    pub write_backoff_ms: u64,
    /// Head polling interval of the live subscription (milliseconds).
    pub live_poll_interval_ms: u64,
    /// Sleep when backfill is caught up with the head (milliseconds).
    pub idle_poll_interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            contract_address: DEFAULT_CONTRACT_ADDRESS,
            genesis_block: DEFAULT_GENESIS_BLOCK,
            max_window_span: 480,
            write_batch_size: 100,
            write_interval_ms: 250,
            dead_letter_interval_ms: 30_000,
            max_write_attempts: 3,
            write_backoff_ms: 125,
            live_poll_interval_ms: 2_000,
            idle_poll_interval_ms: 2_000,
        }
    }
}

impl IndexerConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        let nonzero = [
            ("max_window_span", self.max_window_span),
            ("write_batch_size", self.write_batch_size as u64),
            ("write_interval_ms", self.write_interval_ms),
            ("dead_letter_interval_ms", self.dead_letter_interval_ms),
            ("max_write_attempts", u64::from(self.max_write_attempts)),
            ("live_poll_interval_ms", self.live_poll_interval_ms),
            ("idle_poll_interval_ms", self.idle_poll_interval_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(IndexerError::Config(format!("{name} must be greater than zero")));
        }
        if self.write_batch_size > MAX_WRITE_BATCH_SIZE {
            return Err(IndexerError::Config(format!(
                "write_batch_size {} exceeds the maximum of {MAX_WRITE_BATCH_SIZE}",
                self.write_batch_size
            )));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.max_write_attempts,
            Duration::from_millis(self.write_backoff_ms),
        )
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            batch_size: self.write_batch_size,
            write_interval: Duration::from_millis(self.write_interval_ms),
            dead_letter_interval: Duration::from_millis(self.dead_letter_interval_ms),
            retry: self.retry_config(),
        }
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Scanning historical windows up to the current head.
    Backfilling,
    /// Following the chain tip through the log subscription.
    Live,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
