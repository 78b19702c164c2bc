//! Background dispatch for the access log.
//!
//! # Responsibilities
//! - Accept completed records from request tasks without blocking them
//! - Drop records when the queue is saturated, releasing their buffers
//! - Dispatch queued records to the sync delegate on a blocking thread
//! - Drain the queue on shutdown, up to a grace period
//!
//! # Data Flow
//! ```text
//! request task                 worker task
//! ────────────                 ───────────
//! submit() ── try_send ──▶ [bounded queue] ── recv ──▶ spawn_blocking(dispatch)
//!    │                                                        │
//!    └── Full/Closed: record dropped (finalizer: Dropped)     └── finalizer: Delivered
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::access_log::delegate::{ExchangeLogger, LoggerState, SyncDelegateLogger};
use crate::access_log::record::{Disposition, ExchangeRecord};
use crate::observability::metrics;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Counters kept by the async logger.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub dispatched: AtomicU64,
    /// Dispatched records for which at least one sink failed.
    pub failed: AtomicU64,
    pub queued: AtomicUsize,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub queued: usize,
}

/// Non-blocking logger backed by a bounded queue and one worker task.
pub struct AsyncDelegateLogger {
    sender: Mutex<Option<mpsc::Sender<ExchangeRecord>>>,
    delegate: Arc<SyncDelegateLogger>,
    stats: Arc<DispatchStats>,
    state: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drop_log_threshold: u64,
    last_drop_log: AtomicU64,
}

impl AsyncDelegateLogger {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(delegate: Arc<SyncDelegateLogger>, capacity: usize, drop_log_threshold: u64) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let state = Arc::new(AtomicU8::new(LoggerState::Idle as u8));

        let handle = tokio::spawn(run_worker(
            rx,
            Arc::clone(&delegate),
            Arc::clone(&stats),
            Arc::clone(&state),
        ));

        tracing::info!(capacity = capacity, "Async access log started");

        Self {
            sender: Mutex::new(Some(tx)),
            delegate,
            stats,
            state,
            worker: Mutex::new(Some(handle)),
            drop_log_threshold,
            last_drop_log: AtomicU64::new(0),
        }
    }

    pub fn delegate(&self) -> &Arc<SyncDelegateLogger> {
        &self.delegate
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting records and wait for the queue to drain.
    ///
    /// Returns `false` if the grace period expired; records still queued at
    /// that point are released as dropped.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        // Dropping the only sender lets the worker finish once the queue is empty.
        let sender = self.sender.lock().expect("sender lock poisoned").take();
        drop(sender);
        self.state.store(LoggerState::Draining as u8, Ordering::Release);

        let handle = self.worker.lock().expect("worker lock poisoned").take();
        let drained = match handle {
            Some(mut handle) => match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => true,
                Err(_) => {
                    tracing::warn!(
                        queued = self.stats.queued.load(Ordering::Relaxed),
                        grace_secs = grace.as_secs_f64(),
                        "Access log drain timed out; discarding remaining records"
                    );
                    handle.abort();
                    let _ = handle.await;
                    false
                }
            },
            None => true,
        };

        self.state.store(LoggerState::Stopped as u8, Ordering::Release);
        let snapshot = self.stats.snapshot();
        tracing::info!(
            dispatched = snapshot.dispatched,
            dropped = snapshot.dropped,
            failed = snapshot.failed,
            drained = drained,
            "Async access log stopped"
        );
        drained
    }

    fn reject(&self, record: ExchangeRecord, reason: &'static str) {
        let total = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_dropped();
        self.maybe_log_drops(total, &record, reason);
        drop(record);
    }

    fn maybe_log_drops(&self, total_drops: u64, record: &ExchangeRecord, reason: &'static str) {
        let last_log = self.last_drop_log.load(Ordering::Relaxed);
        if total_drops < last_log.saturating_add(self.drop_log_threshold) && last_log != 0 {
            return;
        }
        if self
            .last_drop_log
            .compare_exchange(last_log, total_drops, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                exchange_id = %record.id,
                total_drops = total_drops,
                reason = reason,
                "Access log dropping exchanges"
            );
        }
    }
}

impl ExchangeLogger for AsyncDelegateLogger {
    fn submit(&self, record: ExchangeRecord) {
        // Counted before the send so the worker never decrements first.
        let depth = self.stats.queued.fetch_add(1, Ordering::Relaxed) + 1;

        let attempt = {
            let guard = self.sender.lock().expect("sender lock poisoned");
            match guard.as_ref() {
                Some(tx) => tx.try_send(record),
                None => Err(mpsc::error::TrySendError::Closed(record)),
            }
        };

        // Rejected records are released outside the lock; their finalizers touch disk.
        match attempt {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::record_queue_depth(depth);
            }
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.stats.queued.fetch_sub(1, Ordering::Relaxed);
                self.reject(record, "queue full");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.stats.queued.fetch_sub(1, Ordering::Relaxed);
                self.reject(record, "logger stopped");
            }
        }
    }

    fn state(&self) -> LoggerState {
        LoggerState::from(self.state.load(Ordering::Acquire))
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<ExchangeRecord>,
    delegate: Arc<SyncDelegateLogger>,
    stats: Arc<DispatchStats>,
    state: Arc<AtomicU8>,
) {
    while let Some(record) = rx.recv().await {
        let depth = stats.queued.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_queue_depth(depth);
        let _ = state.compare_exchange(
            LoggerState::Idle as u8,
            LoggerState::Dispatching as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let id = record.id.clone();
        let delegate = Arc::clone(&delegate);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut record = record;
            let result = delegate.dispatch(&record);
            let ok = result.is_ok();
            record.finish(Disposition::Delivered(&result));
            ok
        })
        .await;

        stats.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatched();
        match outcome {
            Ok(true) => {}
            Ok(false) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(exchange_id = %id, error = %e, "Access log dispatch task failed");
            }
        }

        if stats.queued.load(Ordering::Relaxed) == 0 {
            let _ = state.compare_exchange(
                LoggerState::Dispatching as u8,
                LoggerState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    tracing::debug!("Access log worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::result::LogSinkResult;
    use crate::access_log::sink::LogSink;
    use crate::capture::ExchangeId;

    struct Counting(AtomicUsize);

    impl LogSink for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            LogSinkResult::ok()
        }
    }

    fn record(n: usize) -> ExchangeRecord {
        ExchangeRecord::new(ExchangeId::from(format!("rec{n:04}")), "GET", "/")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn saturated_queue_drops_the_overflow() {
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone()]));
        let logger = AsyncDelegateLogger::spawn(delegate, 3, 100);

        // The worker cannot run until this task yields.
        for n in 0..4 {
            logger.submit(record(n));
        }
        assert_eq!(logger.stats().dropped, 1);
        assert_eq!(logger.stats().enqueued, 3);

        assert!(logger.shutdown(Duration::from_secs(5)).await);
        assert_eq!(sink.0.load(Ordering::SeqCst), 3);
        assert_eq!(logger.stats().dispatched, 3);
        assert_eq!(logger.state(), LoggerState::Stopped);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone()]));
        let logger = AsyncDelegateLogger::spawn(delegate, 8, 100);

        assert!(logger.shutdown(Duration::from_secs(1)).await);
        logger.submit(record(1));

        assert_eq!(logger.stats().dropped, 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_records_do_not_count_as_queued() {
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone()]));
        let logger = AsyncDelegateLogger::spawn(delegate, 2, 100);

        for n in 0..5 {
            logger.submit(record(n));
        }
        assert_eq!(logger.stats().queued, 2);
        assert_eq!(logger.stats().dropped, 3);

        assert!(logger.shutdown(Duration::from_secs(5)).await);
        assert_eq!(logger.stats().queued, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_depth_never_underflows_under_a_fast_worker() {
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone()]));
        let capacity = 64;
        let logger = AsyncDelegateLogger::spawn(delegate, capacity, 1_000_000);

        for n in 0..20_000 {
            logger.submit(record(n));
            let queued = logger.stats().queued;
            assert!(queued <= capacity + 1, "queued depth {} after submit {}", queued, n);
        }

        assert!(logger.shutdown(Duration::from_secs(30)).await);
        let stats = logger.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.enqueued + stats.dropped, 20_000);
        assert_eq!(stats.dispatched, stats.enqueued);
    }
}
