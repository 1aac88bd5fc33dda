//! Push-style log subscription for the live phase.
//!
//! Over HTTP there is no `eth_subscribe`, so [`PollingSubscriber`] polls the
//! head and fetches any new blocks' logs in capped windows, delivering each
//! non-empty window as one batch on a stream. The background task stops once
//! the stream is dropped or an upstream call fails.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::window::WindowPlanner;

use crate::fetcher::{EvmRpcClient, LogFilter, RawLog};

/// A stream of log batches; an `Err` item is terminal.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<RawLog>, IndexerError>> + Send>>;

/// Source of live log batches starting at a given block.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Start streaming logs matching `filter` from block `from` onwards.
    async fn subscribe_logs(&self, from: u64, filter: LogFilter) -> Result<LogStream, IndexerError>;
}

/// [`LogSubscriber`] that polls `eth_blockNumber` / `eth_getLogs`.
pub struct PollingSubscriber<C> {
    client: Arc<C>,
    poll_interval: Duration,
    planner: WindowPlanner,
}

impl<C: EvmRpcClient + 'static> PollingSubscriber<C> {
    pub fn new(client: Arc<C>, poll_interval: Duration, max_window_span: u64) -> Self {
        Self {
            client,
            poll_interval,
            planner: WindowPlanner::new(max_window_span),
        }
    }
}

#[async_trait]
impl<C: EvmRpcClient + 'static> LogSubscriber for PollingSubscriber<C> {
    async fn subscribe_logs(&self, from: u64, filter: LogFilter) -> Result<LogStream, IndexerError> {
        let (tx, rx) = mpsc::channel(16);
        let task = PollTask {
            client: Arc::clone(&self.client),
            filter,
            planner: self.planner,
            poll_interval: self.poll_interval,
            next: from,
            tx,
        };
        tokio::spawn(task.run());

        tracing::info!(from, poll_ms = self.poll_interval.as_millis() as u64, "log subscription started");

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

struct PollTask<C> {
    client: Arc<C>,
    filter: LogFilter,
    planner: WindowPlanner,
    poll_interval: Duration,
    next: u64,
    tx: mpsc::Sender<Result<Vec<RawLog>, IndexerError>>,
}

impl<C: EvmRpcClient> PollTask<C> {
    async fn run(mut self) {
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    let _ = self.tx.send(Err(e)).await;
                    break;
                }
            }

            tokio::select! {
                _ = self.tx.closed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::debug!(next = self.next, "log subscription stopped");
    }

    /// Fetch everything between `next` and the current head. Returns `false`
    /// once the receiver is gone.
    async fn poll_once(&mut self) -> Result<bool, IndexerError> {
        let head = self.client.get_block_number().await?;

        while let Some(window) = self.planner.next(self.next, head) {
            let logs = self.client.get_logs(&window, &self.filter).await?;
            if !logs.is_empty() {
                tracing::debug!(%window, logs = logs.len(), "live logs received");
                if self.tx.send(Ok(logs)).await.is_err() {
                    return Ok(false);
                }
            }
            self.next = window.next_from();
        }
        Ok(!self.tx.is_closed())
    }
}
