//! Fluent builder API for creating MiniMart pipelines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minimart_indexer_evm::{HttpRpcClient, IndexerBuilder};
//! use minimart_indexer_storage::MemoryStore;
//!
//! # fn main() -> Result<(), minimart_indexer_core::IndexerError> {
//! let client = HttpRpcClient::default_for("https://sepolia.base.org")?;
//! let pipeline = IndexerBuilder::new()
//!     .genesis_block(32_908_523)
//!     .max_window_span(480)
//!     .write_batch_size(100)
//!     .build(client, Arc::new(MemoryStore::new()))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use alloy_primitives::Address;

use minimart_indexer_core::coordinator::WriteCoordinator;
use minimart_indexer_core::cursor::CursorStore;
use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::indexer::IndexerConfig;
use minimart_indexer_core::queue::EventQueue;
use minimart_indexer_core::window::WindowPlanner;
use minimart_indexer_core::writer::BatchWriter;

use crate::decoder::MiniMartDecoder;
use crate::fetcher::{EvmRpcClient, LogFilter};
use crate::pipeline::Pipeline;
use crate::scanner::ChainScanner;
use crate::subscription::{LogSubscriber, PollingSubscriber};

/// Fluent builder for `IndexerConfig` and [`Pipeline`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    subscriber: Option<Arc<dyn LogSubscriber>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            subscriber: None,
        }
    }

    /// Set the contract whose logs are ingested.
    pub fn contract_address(mut self, address: Address) -> Self {
        self.config.contract_address = address;
        self
    }

    /// Set the block scanned first when the store is empty.
    pub fn genesis_block(mut self, block: u64) -> Self {
        self.config.genesis_block = block;
        self
    }

    /// Set the maximum blocks per `eth_getLogs` window.
    pub fn max_window_span(mut self, span: u64) -> Self {
        self.config.max_window_span = span;
        self
    }

    /// Set the maximum records per write cycle.
    pub fn write_batch_size(mut self, size: usize) -> Self {
        self.config.write_batch_size = size;
        self
    }

    pub fn write_interval_ms(mut self, ms: u64) -> Self {
        self.config.write_interval_ms = ms;
        self
    }

    pub fn dead_letter_interval_ms(mut self, ms: u64) -> Self {
        self.config.dead_letter_interval_ms = ms;
        self
    }

    /// Set total write attempts per batch and the fixed delay between them.
    pub fn write_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.config.max_write_attempts = max_attempts;
        self.config.write_backoff_ms = backoff_ms;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn live_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.live_poll_interval_ms = ms;
        self
    }

    /// Set how long a caught-up scanner sleeps before re-reading the head.
    pub fn idle_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.idle_poll_interval_ms = ms;
        self
    }

    /// Replace the default polling subscription used by the live phase.
    pub fn subscriber(mut self, subscriber: Arc<dyn LogSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and wire a pipeline around `client` and
    /// `store`.
    pub fn build<C, S>(self, client: C, store: Arc<S>) -> Result<Pipeline<C>, IndexerError>
    where
        C: EvmRpcClient + 'static,
        S: BatchWriter + CursorStore + 'static,
    {
        self.config.validate()?;
        let config = self.config;
        let client = Arc::new(client);

        let subscriber = match self.subscriber {
            Some(subscriber) => subscriber,
            None => Arc::new(PollingSubscriber::new(
                Arc::clone(&client),
                config.live_poll_interval(),
                config.max_window_span,
            )),
        };

        let decoder = MiniMartDecoder::new();
        let filter = LogFilter::new(config.contract_address, decoder.topic0s());
        let intake = EventQueue::new("intake");
        let dead_letter = EventQueue::new("dead-letter");

        let coordinator = Arc::new(WriteCoordinator::new(
            store.clone(),
            intake.clone(),
            dead_letter,
            config.coordinator_config(),
        ));
        let scanner = ChainScanner::new(
            client,
            subscriber,
            decoder,
            filter,
            WindowPlanner::new(config.max_window_span),
            intake,
            config.idle_poll_interval(),
        );

        Ok(Pipeline::new(config, scanner, store, coordinator))
    }
}
