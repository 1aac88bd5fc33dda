//! Write coordinator: bounded retry around the batch writer, with a
//! dead-letter area for batches that keep failing.
//!
//! # Cycle
//!
//! ```text
//! Idle → Draining → Writing ─┬─→ Committed
//!                      ↑     ├─→ Retrying ─┐
//!                      └─────┼─────────────┘
//!                            └─→ Exhausted (batch appended to dead-letter)
//! ```
//!
//! Both terminal states fall back to `Idle` when the cycle ends.
//!
//! Two tickers drive cycles: the primary one drains the intake queue, the
//! dead-letter one drains the holding area. A single in-flight flag serializes
//! every cycle across both.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::queue::EventQueue;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::EventRecord;
use crate::writer::BatchWriter;

// ─── Config ──────────────────────────────────────────────────────────────────

/// Coordinator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum records drained per cycle.
    pub batch_size: usize,
    /// Period of the primary (intake) ticker.
    pub write_interval: Duration,
    /// Period of the dead-letter ticker.
    pub dead_letter_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            write_interval: Duration::from_millis(250),
            dead_letter_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

// ─── Cycle state ─────────────────────────────────────────────────────────────

/// Which queue a cycle drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueSource {
    Intake,
    DeadLetter,
}

impl std::fmt::Display for QueueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intake => write!(f, "intake"),
            Self::DeadLetter => write!(f, "dead-letter"),
        }
    }
}

/// Where the current write cycle is; `Idle` between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCycleState {
    Idle,
    Draining,
    Writing { attempt: u32 },
    Retrying { attempt: u32 },
    Committed,
    Exhausted,
}

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Another cycle holds the in-flight flag.
    Busy,
    /// The source queue had nothing to drain.
    Empty,
}

/// Result of one [`WriteCoordinator::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Committed {
        records: usize,
        inserted: u64,
        attempts: u32,
    },
    DeadLettered {
        records: usize,
        attempts: u32,
    },
}

/// Cumulative counters since the coordinator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub committed_batches: u64,
    /// Rows newly inserted; duplicates are not counted.
    pub records_written: u64,
    pub retries: u64,
    pub dead_lettered_batches: u64,
}

#[derive(Default)]
struct Counters {
    committed_batches: AtomicU64,
    records_written: AtomicU64,
    retries: AtomicU64,
    dead_lettered_batches: AtomicU64,
}

// ─── WriteCoordinator ────────────────────────────────────────────────────────

/// Drains queues into a [`BatchWriter`] one cycle at a time.
pub struct WriteCoordinator {
    writer: Arc<dyn BatchWriter>,
    intake: EventQueue,
    dead_letter: EventQueue,
    policy: RetryPolicy,
    config: CoordinatorConfig,
    in_flight: AtomicBool,
    state: Mutex<WriteCycleState>,
    counters: Counters,
}

impl WriteCoordinator {
    pub fn new(
        writer: Arc<dyn BatchWriter>,
        intake: EventQueue,
        dead_letter: EventQueue,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            writer,
            intake,
            dead_letter,
            policy: RetryPolicy::new(config.retry),
            config,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(WriteCycleState::Idle),
            counters: Counters::default(),
        }
    }

    pub fn intake(&self) -> &EventQueue {
        &self.intake
    }

    pub fn dead_letter(&self) -> &EventQueue {
        &self.dead_letter
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> WriteCycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            committed_batches: self.counters.committed_batches.load(Ordering::Relaxed),
            records_written: self.counters.records_written.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            dead_lettered_batches: self.counters.dead_lettered_batches.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, next: WriteCycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn queue(&self, source: QueueSource) -> &EventQueue {
        match source {
            QueueSource::Intake => &self.intake,
            QueueSource::DeadLetter => &self.dead_letter,
        }
    }

    /// Run one write cycle against `source`.
    ///
    /// Skips when another cycle is in flight or the queue is empty. Otherwise
    /// drains up to `batch_size` records and writes them, retrying store
    /// failures per the policy; a batch that exhausts its attempts, or fails
    /// with a non-store error, is appended to the dead-letter area in its
    /// original order.
    pub async fn process(&self, source: QueueSource) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(self) else {
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        self.set_state(WriteCycleState::Draining);
        let batch = self.queue(source).drain(self.config.batch_size);
        if batch.is_empty() {
            return CycleOutcome::Skipped(SkipReason::Empty);
        }

        self.write_with_retry(source, batch).await
    }

    async fn write_with_retry(&self, source: QueueSource, batch: Vec<EventRecord>) -> CycleOutcome {
        let records = batch.len();
        let mut attempt = 1u32;

        loop {
            self.set_state(WriteCycleState::Writing { attempt });
            match self.writer.write_batch(&batch).await {
                Ok(inserted) => {
                    self.counters.committed_batches.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .records_written
                        .fetch_add(inserted, Ordering::Relaxed);
                    self.set_state(WriteCycleState::Committed);
                    tracing::info!(
                        %source,
                        records,
                        inserted,
                        attempt,
                        "batch committed"
                    );
                    return CycleOutcome::Committed {
                        records,
                        inserted,
                        attempts: attempt,
                    };
                }
                Err(e) => match self.retry_delay(&e, attempt) {
                    Some(delay) => {
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        self.set_state(WriteCycleState::Retrying { attempt });
                        tracing::warn!(
                            %source,
                            records,
                            attempt,
                            max_attempts = self.policy.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "batch write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        self.dead_letter.enqueue(batch);
                        self.counters
                            .dead_lettered_batches
                            .fetch_add(1, Ordering::Relaxed);
                        self.set_state(WriteCycleState::Exhausted);
                        tracing::error!(
                            %source,
                            records,
                            attempts = attempt,
                            dead_letter_depth = self.dead_letter.len(),
                            error = %e,
                            "batch write exhausted retries, moved to dead-letter"
                        );
                        return CycleOutcome::DeadLettered {
                            records,
                            attempts: attempt,
                        };
                    }
                },
            }
        }
    }

    /// Only store failures are worth another attempt; anything else fails the
    /// same way every time and goes straight to the dead-letter area.
    fn retry_delay(&self, error: &IndexerError, attempt: u32) -> Option<Duration> {
        if error.is_storage() {
            self.policy.next_delay(attempt)
        } else {
            None
        }
    }

    /// Primary ticker: drain the intake queue every `write_interval` until
    /// `cancel` fires. A cycle already running when cancellation arrives is
    /// allowed to finish.
    pub async fn run_primary(self: Arc<Self>, cancel: CancellationToken) {
        self.run_ticker(QueueSource::Intake, self.config.write_interval, cancel)
            .await;
    }

    /// Dead-letter ticker: retry the holding area every
    /// `dead_letter_interval` until `cancel` fires.
    pub async fn run_dead_letter(self: Arc<Self>, cancel: CancellationToken) {
        self.run_ticker(
            QueueSource::DeadLetter,
            self.config.dead_letter_interval,
            cancel,
        )
        .await;
    }

    async fn run_ticker(&self, source: QueueSource, period: Duration, cancel: CancellationToken) {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(%source, period_ms = period.as_millis() as u64, "write ticker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if source == QueueSource::DeadLetter {
                        match self.dead_letter.len() {
                            0 => tracing::debug!("no dead letters"),
                            depth => tracing::info!(depth, "reprocessing dead-letter batches"),
                        }
                    }
                    self.process(source).await;
                }
            }
        }

        tracing::debug!(%source, "write ticker stopped");
    }
}

impl std::fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("intake", &self.intake)
            .field("dead_letter", &self.dead_letter)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Holds the in-flight flag for one cycle. Dropping it returns the cycle to
/// `Idle`, also when the cycle's future is dropped mid-write.
struct InFlightGuard<'a> {
    coordinator: &'a WriteCoordinator,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(coordinator: &'a WriteCoordinator) -> Option<Self> {
        coordinator
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { coordinator })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.set_state(WriteCycleState::Idle);
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
