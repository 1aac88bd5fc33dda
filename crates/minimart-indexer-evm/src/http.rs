//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! No retry happens here: a failed upstream call ends the process and the
//! supervisor restarts it from the committed cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::window::ScanWindow;

use crate::fetcher::{parse_hex_u64, EvmRpcClient, LogFilter, RawLog};
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC client for a single HTTP endpoint.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        let resp = resp
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: invalid response: {e}")))?;

        resp.into_result()
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc(format!("eth_blockNumber: unexpected result {result}")))
    }

    async fn get_logs(
        &self,
        window: &ScanWindow,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let result = self
            .call("eth_getLogs", vec![filter.to_params(window)])
            .await?;
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("eth_getLogs {window}: {e}")))
    }
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient").field("url", &self.url).finish()
    }
}
