//! Chain scanner: historical backfill in capped windows, then live tail.
//!
//! # Phase 1: BACKFILL
//! From the resume position to the head, one window of at most
//! `max_window_span` blocks at a time: fetch logs → decode → enqueue the
//! window's records as one unit → re-read the head. Ends once `from` passes
//! the head.
//!
//! # Phase 2: LIVE
//! Subscribe from the head observed when backfill ended and enqueue every
//! delivered batch as it arrives.
//!
//! Upstream failures are never retried here; they end the scan.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::queue::EventQueue;
use minimart_indexer_core::types::IndexPhase;
use minimart_indexer_core::window::WindowPlanner;

use crate::decoder::MiniMartDecoder;
use crate::fetcher::{EvmRpcClient, LogFilter, RawLog};
use crate::subscription::LogSubscriber;

/// What a finished (or cancelled) backfill covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    /// Windows requested from the node.
    pub windows: u64,
    /// Records enqueued.
    pub records: usize,
    /// Head observed when backfill stopped; the live tail starts here.
    /// Zero if cancelled before the first head read returned.
    pub head: u64,
    /// Next block backfill would have scanned.
    pub next_block: u64,
    pub cancelled: bool,
}

impl BackfillReport {
    fn cancel(mut self) -> Self {
        tracing::info!(next_block = self.next_block, windows = self.windows, "backfill cancelled");
        self.cancelled = true;
        self
    }
}

/// Await `fut` unless `cancel` fires first, in which case `Ok(None)`.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, IndexerError>>,
) -> Result<Option<T>, IndexerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = fut => result.map(Some),
    }
}

/// Walks the contract's logs and feeds decoded records into the intake queue.
pub struct ChainScanner<C> {
    client: Arc<C>,
    subscriber: Arc<dyn LogSubscriber>,
    decoder: MiniMartDecoder,
    filter: LogFilter,
    planner: WindowPlanner,
    intake: EventQueue,
    idle_interval: Duration,
}

impl<C: EvmRpcClient> ChainScanner<C> {
    pub fn new(
        client: Arc<C>,
        subscriber: Arc<dyn LogSubscriber>,
        decoder: MiniMartDecoder,
        filter: LogFilter,
        planner: WindowPlanner,
        intake: EventQueue,
        idle_interval: Duration,
    ) -> Self {
        Self {
            client,
            subscriber,
            decoder,
            filter,
            planner,
            intake,
            idle_interval,
        }
    }

    pub fn intake(&self) -> &EventQueue {
        &self.intake
    }

    /// Scan `[resume_from, head]` window by window, re-reading the head after
    /// each window so a moving chain is followed until caught up.
    ///
    /// If the node reports a head behind `resume_from` before anything was
    /// scanned (a lagging node, or a genesis ahead of the chain), no request
    /// is made: the scanner sleeps `idle_interval` and reads the head again.
    ///
    /// Every node request races `cancel`. A window whose logs arrive after
    /// cancellation is not enqueued.
    pub async fn backfill(
        &self,
        resume_from: u64,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, IndexerError> {
        let mut report = BackfillReport {
            windows: 0,
            records: 0,
            head: 0,
            next_block: resume_from,
            cancelled: false,
        };
        match unless_cancelled(cancel, self.client.get_block_number()).await? {
            Some(head) => report.head = head,
            None => return Ok(report.cancel()),
        }

        tracing::info!(
            from = resume_from,
            head = report.head,
            max_span = self.planner.max_span(),
            "starting backfill"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(report.cancel());
            }

            let Some(window) = self.planner.next(report.next_block, report.head) else {
                if report.windows > 0 {
                    break;
                }
                tracing::warn!(
                    from = report.next_block,
                    head = report.head,
                    idle_ms = self.idle_interval.as_millis() as u64,
                    "head is behind the resume position, waiting"
                );
                tokio::select! {
                    _ = cancel.cancelled() => continue,
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
                match unless_cancelled(cancel, self.client.get_block_number()).await? {
                    Some(head) => report.head = head,
                    None => return Ok(report.cancel()),
                }
                continue;
            };

            let fetch = self.client.get_logs(&window, &self.filter);
            let Some(logs) = unless_cancelled(cancel, fetch).await? else {
                return Ok(report.cancel());
            };
            let enqueued = self.ingest(&logs, IndexPhase::Backfill)?;

            report.windows += 1;
            report.records += enqueued;
            report.next_block = window.next_from();
            match unless_cancelled(cancel, self.client.get_block_number()).await? {
                Some(head) => report.head = head,
                None => return Ok(report.cancel()),
            }

            tracing::info!(
                %window,
                logs = logs.len(),
                records = enqueued,
                head = report.head,
                intake_depth = self.intake.len(),
                "backfill window scanned"
            );
        }

        tracing::info!(
            at = report.head,
            windows = report.windows,
            records = report.records,
            "backfill complete"
        );
        Ok(report)
    }

    /// Stream live logs from `from` until `cancel` fires. Returns an error if
    /// the subscription fails or ends on its own.
    pub async fn live_tail(&self, from: u64, cancel: &CancellationToken) -> Result<(), IndexerError> {
        let mut stream = self.subscriber.subscribe_logs(from, self.filter.clone()).await?;
        tracing::info!(from, "live tail started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("live tail stopping");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(logs)) => {
                        let enqueued = self.ingest(&logs, IndexPhase::Live)?;
                        tracing::debug!(logs = logs.len(), records = enqueued, "live batch enqueued");
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(IndexerError::Rpc("log subscription ended unexpectedly".into())),
                },
            }
        }
    }

    /// Decode `logs` and enqueue them as one unit. Returns the record count.
    fn ingest(&self, logs: &[RawLog], phase: IndexPhase) -> Result<usize, IndexerError> {
        let records = self.decoder.decode_all(logs)?;
        let n = records.len();
        if n > 0 {
            self.intake.enqueue(records);
        } else if !logs.is_empty() {
            tracing::debug!(%phase, logs = logs.len(), "all logs removed, nothing enqueued");
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::EventKind;
    use alloy_primitives::B256;
    use async_trait::async_trait;
    use minimart_indexer_core::window::ScanWindow;
    use std::sync::Mutex;

    /// Scripted heads; every block in a window yields one `OrderRemoved` log.
    struct Scripted {
        heads: Mutex<Vec<u64>>,
        windows: Mutex<Vec<ScanWindow>>,
        fail_logs_from: Option<u64>,
        hang_logs: bool,
        /// Intake depth seen at each head read, when `watch` is set.
        watch: Option<EventQueue>,
        depths: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(heads: Vec<u64>) -> Self {
            Self {
                heads: Mutex::new(heads),
                windows: Mutex::default(),
                fail_logs_from: None,
                hang_logs: false,
                watch: None,
                depths: Mutex::default(),
            }
        }

        fn windows(&self) -> Vec<ScanWindow> {
            self.windows.lock().unwrap().clone()
        }

        fn depths(&self) -> Vec<usize> {
            self.depths.lock().unwrap().clone()
        }
    }

    fn removed_order(block: u64) -> RawLog {
        RawLog {
            address: "0x0".into(),
            topics: vec![
                EventKind::OrderRemoved.topic0().to_string(),
                B256::with_last_byte(block as u8).to_string(),
            ],
            data: "0x".into(),
            block_number: format!("{block:#x}"),
            block_hash: None,
            tx_hash: format!("0x{block:064x}"),
            log_index: "0x0".into(),
            removed: None,
        }
    }

    #[async_trait]
    impl EvmRpcClient for Scripted {
        async fn get_block_number(&self) -> Result<u64, IndexerError> {
            if let Some(intake) = &self.watch {
                self.depths.lock().unwrap().push(intake.len());
            }
            let mut heads = self.heads.lock().unwrap();
            // The last scripted head repeats forever.
            if heads.len() > 1 {
                Ok(heads.remove(0))
            } else {
                heads.first().copied().ok_or_else(|| IndexerError::Rpc("no head".into()))
            }
        }

        async fn get_logs(
            &self,
            window: &ScanWindow,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, IndexerError> {
            if self.hang_logs {
                std::future::pending::<()>().await;
            }
            if self.fail_logs_from.is_some_and(|b| window.from_block() >= b) {
                return Err(IndexerError::Rpc("eth_getLogs: 503".into()));
            }
            self.windows.lock().unwrap().push(*window);
            Ok((window.from_block()..=window.to_block()).map(removed_order).collect())
        }
    }

    struct NoSubscription;

    #[async_trait]
    impl LogSubscriber for NoSubscription {
        async fn subscribe_logs(
            &self,
            _from: u64,
            _filter: LogFilter,
        ) -> Result<crate::subscription::LogStream, IndexerError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    fn scanner(client: Arc<Scripted>, span: u64) -> ChainScanner<Scripted> {
        scanner_into(client, span, EventQueue::new("intake"))
    }

    fn scanner_into(client: Arc<Scripted>, span: u64, intake: EventQueue) -> ChainScanner<Scripted> {
        ChainScanner::new(
            client,
            Arc::new(NoSubscription),
            MiniMartDecoder::new(),
            LogFilter::new(Default::default(), vec![]),
            WindowPlanner::new(span),
            intake,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn genesis_100_head_250_span_100() {
        let intake = EventQueue::new("intake");
        let mut scripted = Scripted::new(vec![250]);
        scripted.watch = Some(intake.clone());
        let client = Arc::new(scripted);
        let s = scanner_into(client.clone(), 100, intake);

        let report = s.backfill(100, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            client.windows(),
            vec![ScanWindow::new(100, 199).unwrap(), ScanWindow::new(200, 250).unwrap()]
        );
        assert_eq!(report.windows, 2);
        assert_eq!(report.records, 151);
        assert_eq!(report.head, 250);
        assert_eq!(report.next_block, 251);
        assert_eq!(s.intake().len(), 151);
        // Each window lands in the queue whole, before the next head read.
        assert_eq!(client.depths(), vec![0, 100, 151]);
    }

    #[tokio::test]
    async fn follows_a_moving_head_until_caught_up() {
        // Head read before each window: 20, then 25 after the first, then 25.
        let client = Arc::new(Scripted::new(vec![20, 25]));
        let s = scanner(client.clone(), 10);

        let report = s.backfill(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            client.windows(),
            vec![
                ScanWindow::new(10, 19).unwrap(),
                ScanWindow::new(20, 25).unwrap()
            ]
        );
        assert_eq!(report.head, 25);
    }

    #[tokio::test]
    async fn lagging_head_idles_without_requesting_logs() {
        let client = Arc::new(Scripted::new(vec![90, 95, 100]));
        let s = scanner(client.clone(), 50);

        let report = s.backfill(100, &CancellationToken::new()).await.unwrap();

        assert_eq!(client.windows(), vec![ScanWindow::new(100, 100).unwrap()]);
        assert_eq!(report.windows, 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_propagated() {
        let mut scripted = Scripted::new(vec![500]);
        scripted.fail_logs_from = Some(200);
        let client = Arc::new(scripted);
        let s = scanner(client.clone(), 100);

        let err = s.backfill(100, &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_fatal_upstream());
        // The window before the failure is already enqueued.
        assert_eq!(s.intake().len(), 100);
    }

    #[tokio::test]
    async fn cancelled_backfill_stops_early() {
        let client = Arc::new(Scripted::new(vec![1_000]));
        let s = scanner(client.clone(), 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = s.backfill(0, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(client.windows().is_empty());
    }

    #[tokio::test]
    async fn cancel_interrupts_a_hung_log_request() {
        let mut scripted = Scripted::new(vec![1_000]);
        scripted.hang_logs = true;
        let client = Arc::new(scripted);
        let s = scanner(client.clone(), 10);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        };
        let (report, ()) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(s.backfill(0, &cancel), canceller) },
        )
        .await
        .expect("backfill ignored cancellation");

        let report = report.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.windows, 0);
        assert_eq!(report.head, 1_000);
        assert!(s.intake().is_empty());
    }

    #[tokio::test]
    async fn live_tail_returns_on_cancel() {
        let client = Arc::new(Scripted::new(vec![10]));
        let s = scanner(client, 10);
        let cancel = CancellationToken::new();

        let tail = s.live_tail(10, &cancel);
        cancel.cancel();
        assert!(tail.await.is_ok());
    }
}
