//! EVM log source abstraction.
//!
//! The scanner only needs two calls from a node: `eth_blockNumber` for the
//! head and `eth_getLogs` over an inclusive window filtered by contract
//! address and topic0.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::window::ScanWindow;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed", default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
            .ok_or_else(|| self.malformed(format!("bad blockNumber {:?}", self.block_number)))
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        parse_hex_u64(&self.log_index)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.malformed(format!("bad logIndex {:?}", self.log_index)))
    }

    /// Returns `true` if the node flagged this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// A decode error pointing at this log.
    pub fn malformed(&self, reason: impl Into<String>) -> IndexerError {
        IndexerError::decode(&self.tx_hash, &self.log_index, reason)
    }
}

/// Address + topic0 filter for `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    /// Accepted topic0 values; empty matches any event of the contract.
    pub topic0: Vec<B256>,
}

impl LogFilter {
    pub fn new(address: Address, topic0: Vec<B256>) -> Self {
        Self { address, topic0 }
    }

    /// The `eth_getLogs` parameter object for `window`.
    pub fn to_params(&self, window: &ScanWindow) -> Value {
        let mut params = json!({
            "fromBlock": format!("{:#x}", window.from_block()),
            "toBlock": format!("{:#x}", window.to_block()),
            "address": self.address.to_string(),
        });
        if !self.topic0.is_empty() {
            let topics: Vec<String> = self.topic0.iter().map(|t| t.to_string()).collect();
            params["topics"] = json!([topics]);
        }
        params
    }
}

/// Trait for reading EVM logs from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    async fn get_logs(
        &self,
        window: &ScanWindow,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError>;
}

#[async_trait]
impl<T: EvmRpcClient + ?Sized> EvmRpcClient for Arc<T> {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        (**self).get_block_number().await
    }

    async fn get_logs(
        &self,
        window: &ScanWindow,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        (**self).get_logs(window, filter).await
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}
