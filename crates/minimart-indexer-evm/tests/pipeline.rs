//! End-to-end pipeline runs against a scripted chain and the memory store.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use minimart_indexer_core::cursor::{determine_resume_position, CursorStore, ResumeOrigin};
use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::indexer::IndexerState;
use minimart_indexer_core::types::{EventRecord, MiniMartEvent};
use minimart_indexer_core::window::ScanWindow;
use minimart_indexer_evm::{EventKind, EvmRpcClient, IndexerBuilder, LogFilter, Pipeline, RawLog};
use minimart_indexer_storage::MemoryStore;

/// A chain whose head and logs the test controls.
#[derive(Default)]
struct MockChain {
    inner: Mutex<ChainState>,
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<RawLog>,
    windows: Vec<ScanWindow>,
    fail_logs: bool,
    /// `eth_getLogs` never answers.
    hang_logs: bool,
}

impl MockChain {
    fn new(head: u64, blocks: &[u64]) -> Arc<Self> {
        let chain = Arc::new(Self::default());
        {
            let mut state = chain.inner.lock().unwrap();
            state.head = head;
            state.logs = blocks.iter().map(|&b| order_removed(b)).collect();
        }
        chain
    }

    fn advance(&self, head: u64, new_blocks: &[u64]) {
        let mut state = self.inner.lock().unwrap();
        state.head = head;
        state.logs.extend(new_blocks.iter().map(|&b| order_removed(b)));
    }

    fn windows(&self) -> Vec<ScanWindow> {
        self.inner.lock().unwrap().windows.clone()
    }
}

/// One `OrderRemoved` log per block, each in its own transaction.
fn order_removed(block: u64) -> RawLog {
    RawLog {
        address: "0xd752f23c1c5b82c1b749ff048b7edc0b70ac5c5a".into(),
        topics: vec![
            EventKind::OrderRemoved.topic0().to_string(),
            B256::left_padding_from(&block.to_be_bytes()).to_string(),
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
impl EvmRpcClient for MockChain {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        Ok(self.inner.lock().unwrap().head)
    }

    async fn get_logs(
        &self,
        window: &ScanWindow,
        _filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let hang = self.inner.lock().unwrap().hang_logs;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.inner.lock().unwrap();
        if state.fail_logs {
            return Err(IndexerError::Rpc("eth_getLogs: connection reset".into()));
        }
        state.windows.push(*window);
        Ok(state
            .logs
            .iter()
            .filter(|log| window.contains(log.block_number_u64().unwrap()))
            .cloned()
            .collect())
    }
}

fn pipeline(chain: Arc<MockChain>, store: Arc<MemoryStore>, genesis: u64) -> Pipeline<Arc<MockChain>> {
    IndexerBuilder::new()
        .genesis_block(genesis)
        .max_window_span(100)
        .write_interval_ms(5)
        .dead_letter_interval_ms(20)
        .write_retry(3, 1)
        .live_poll_interval_ms(5)
        .idle_poll_interval_ms(5)
        .build(chain, store)
        .unwrap()
}

/// Poll `done` until it holds, then cancel `shutdown`.
async fn stop_when(shutdown: CancellationToken, mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("pipeline did not settle in time")
}

fn stored_blocks(store: &MemoryStore) -> Vec<u64> {
    let mut blocks: Vec<u64> = store.events().iter().map(|r| r.block_number).collect();
    blocks.sort_unstable();
    blocks
}

#[tokio::test]
async fn backfill_then_resume_from_highest_block() {
    let chain = MockChain::new(250, &[100, 150, 199, 200, 250]);
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(chain.clone(), store.clone(), 100);

    let shutdown = CancellationToken::new();
    let (report, ()) = within(async {
        tokio::join!(
            p.run(shutdown.clone()),
            stop_when(shutdown.clone(), || store.event_count() == 5)
        )
    })
    .await;
    let report = report.unwrap();

    assert_eq!(
        chain.windows()[..2],
        [ScanWindow::new(100, 199).unwrap(), ScanWindow::new(200, 250).unwrap()]
    );
    assert_eq!(report.resume.origin, ResumeOrigin::Genesis);
    assert_eq!(report.resume.block_number, 100);
    let backfill = report.backfill.unwrap();
    assert_eq!(backfill.windows, 2);
    assert_eq!(backfill.records, 5);
    assert_eq!(p.state(), IndexerState::Stopped);
    assert_eq!(stored_blocks(&store), vec![100, 150, 199, 200, 250]);

    let cursor = determine_resume_position(store.as_ref(), 100).await.unwrap();
    assert_eq!(cursor.block_number, 250);
    assert!(cursor.is_resumed());
}

#[tokio::test]
async fn restart_rescans_the_resume_block_without_duplicates() {
    let chain = MockChain::new(250, &[100, 150, 250]);
    let store = Arc::new(MemoryStore::new());

    let first = pipeline(chain.clone(), store.clone(), 100);
    let shutdown = CancellationToken::new();
    let (report, ()) = within(async {
        tokio::join!(
            first.run(shutdown.clone()),
            stop_when(shutdown.clone(), || store.event_count() == 3)
        )
    })
    .await;
    report.unwrap();

    let second = pipeline(chain.clone(), store.clone(), 100);
    let shutdown = CancellationToken::new();
    let (report, ()) = within(async {
        tokio::join!(
            second.run(shutdown.clone()),
            stop_when(shutdown.clone(), || {
                second.state() == IndexerState::Live
                    && second.intake().is_empty()
                    && second.stats().committed_batches >= 1
            })
        )
    })
    .await;
    let report = report.unwrap();

    assert_eq!(report.resume.origin, ResumeOrigin::Committed);
    assert_eq!(report.resume.block_number, 250);
    assert_eq!(report.stats.records_written, 0);
    assert_eq!(store.event_count(), 3);
}

#[tokio::test]
async fn live_tail_picks_up_new_blocks() {
    let chain = MockChain::new(120, &[110]);
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(chain.clone(), store.clone(), 100);

    let shutdown = CancellationToken::new();
    let advance = async {
        while p.state() != IndexerState::Live {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        chain.advance(180, &[130, 175]);
        stop_when(shutdown.clone(), || store.event_count() == 3).await;
    };
    let (report, ()) = within(async { tokio::join!(p.run(shutdown.clone()), advance) }).await;

    assert!(report.is_ok());
    assert_eq!(stored_blocks(&store), vec![110, 130, 175]);
}

#[tokio::test]
async fn failing_writes_are_dead_lettered_then_recovered() {
    let chain = MockChain::new(150, &[100, 120, 140]);
    let store = Arc::new(MemoryStore::new());
    store.fail_next_writes(3);
    let p = pipeline(chain, store.clone(), 100);

    let shutdown = CancellationToken::new();
    let (report, ()) = within(async {
        tokio::join!(
            p.run(shutdown.clone()),
            stop_when(shutdown.clone(), || store.event_count() == 3)
        )
    })
    .await;
    let report = report.unwrap();

    assert_eq!(report.stats.dead_lettered_batches, 1);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(report.dead_letter_depth, 0);
    assert_eq!(stored_blocks(&store), vec![100, 120, 140]);
}

#[tokio::test]
async fn upstream_failure_is_fatal() {
    let chain = MockChain::new(500, &[100]);
    chain.inner.lock().unwrap().fail_logs = true;
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(chain, store.clone(), 100);

    let err = within(p.run(CancellationToken::new())).await.unwrap_err();

    assert!(err.is_fatal_upstream());
    assert_eq!(p.state(), IndexerState::Error);
    assert_eq!(store.event_count(), 0);
    assert_eq!(store.max_committed_block().await.unwrap(), None);
}

#[tokio::test]
async fn shutdown_during_a_hung_backfill_stops_the_writers() {
    let chain = MockChain::new(500, &[100]);
    chain.inner.lock().unwrap().hang_logs = true;
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(chain, store.clone(), 100);

    let shutdown = CancellationToken::new();
    let late_arrival = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        p.intake().enqueue(vec![EventRecord {
            event: MiniMartEvent::OrderRemoved {
                order_id: B256::with_last_byte(1),
            },
            block_number: 100,
            transaction_hash: B256::with_last_byte(1),
            log_index: 0,
        }]);
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    let (report, ()) = within(async { tokio::join!(p.run(shutdown.clone()), late_arrival) }).await;
    let report = report.unwrap();

    let backfill = report.backfill.unwrap();
    assert!(backfill.cancelled);
    assert_eq!(backfill.windows, 0);
    assert_eq!(p.state(), IndexerState::Stopped);
    assert_eq!(store.event_count(), 0);
    assert_eq!(p.intake().len(), 1);
    assert_eq!(p.stats().committed_batches, 0);
}

#[tokio::test]
async fn report_names_the_lowest_unwritten_dead_letter_block() {
    let chain = MockChain::new(150, &[120, 100, 140]);
    let store = Arc::new(MemoryStore::new());
    store.fail_next_writes(u32::MAX);
    let p = pipeline(chain, store.clone(), 100);

    let shutdown = CancellationToken::new();
    let (report, ()) = within(async {
        tokio::join!(
            p.run(shutdown.clone()),
            stop_when(shutdown.clone(), || p.stats().dead_lettered_batches >= 1)
        )
    })
    .await;
    let report = report.unwrap();

    assert_eq!(store.event_count(), 0);
    assert_eq!(report.intake_depth, 0);
    assert_eq!(report.dead_letter_depth, 3);
    assert_eq!(report.lowest_dead_letter_block, Some(100));
}
