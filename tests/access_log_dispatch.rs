//! Access log dispatch tests.
//!
//! Covers sink isolation, queue backpressure, draining on shutdown, and the
//! finalizer contract that ties dispatch outcomes back to capture buffers.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FailingSink, PanickingSink, RecordingSink, SlowSink};
use traffic_capture::access_log::{
    AsyncDelegateLogger, CapturePipeline, CompletedExchange, Disposition, ExchangeLogger, ExchangeRecord,
    LogSink, LoggerState, SyncDelegateLogger,
};
use traffic_capture::capture::{BufferRepository, Direction, ExchangeId};
use traffic_capture::security::HeaderPolicy;

/// Dispositions observed by finalizers, as "id:outcome" strings.
type Outcomes = Arc<Mutex<Vec<String>>>;

fn tracked_record(n: usize, outcomes: &Outcomes) -> ExchangeRecord {
    let outcomes = Arc::clone(outcomes);
    ExchangeRecord::new(ExchangeId::from(format!("rec{n:04}")), "GET", "/").with_finalizer(Box::new(
        move |record, disposition| {
            let label = match disposition {
                Disposition::Delivered(result) if result.is_ok() => "delivered",
                Disposition::Delivered(_) => "failed",
                Disposition::Dropped => "dropped",
            };
            outcomes.lock().unwrap().push(format!("{}:{}", record.id, label));
        },
    ))
}

fn count(outcomes: &Outcomes, label: &str) -> usize {
    outcomes
        .lock()
        .unwrap()
        .iter()
        .filter(|o| o.ends_with(label))
        .count()
}

#[test]
fn failing_sink_does_not_stop_the_others() {
    let first = Arc::new(RecordingSink::default());
    let failing = Arc::new(FailingSink::default());
    let third = Arc::new(RecordingSink::default());
    let sinks: Vec<Arc<dyn LogSink>> = vec![first.clone(), failing.clone(), third.clone()];
    let logger = SyncDelegateLogger::new(sinks);

    let result = logger.dispatch(&ExchangeRecord::new(ExchangeId::from("iso0001"), "GET", "/"));

    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].sink, "failing");
    assert_eq!(first.len(), 1);
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    assert_eq!(third.len(), 1);
}

#[test]
fn panicking_sink_is_reported_as_a_failure() {
    let after = Arc::new(RecordingSink::default());
    let sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(PanickingSink), after.clone()];
    let logger = SyncDelegateLogger::new(sinks);
    let outcomes = Outcomes::default();

    logger.submit(tracked_record(1, &outcomes));

    assert_eq!(after.len(), 1);
    assert_eq!(count(&outcomes, "failed"), 1);
    assert_eq!(logger.state(), LoggerState::Idle);
}

#[test]
fn sync_logger_finishes_every_record_exactly_once() {
    let logger = SyncDelegateLogger::new(vec![Arc::new(RecordingSink::default()) as Arc<dyn LogSink>]);
    let outcomes = Outcomes::default();

    for n in 0..3 {
        logger.submit(tracked_record(n, &outcomes));
    }
    logger.stop();
    logger.submit(tracked_record(3, &outcomes));

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            "rec0000:delivered".to_string(),
            "rec0001:delivered".to_string(),
            "rec0002:delivered".to_string(),
            "rec0003:dropped".to_string(),
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn full_queue_drops_without_blocking() {
    let sink = Arc::new(RecordingSink::default());
    let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone() as Arc<dyn LogSink>]));
    let capacity = 5;
    let logger = AsyncDelegateLogger::spawn(delegate, capacity, 1);
    let outcomes = Outcomes::default();

    // Nothing yields between submits, so the worker never gets to drain.
    for n in 0..=capacity {
        logger.submit(tracked_record(n, &outcomes));
    }

    let stats = logger.stats();
    assert_eq!(stats.enqueued, capacity as u64);
    assert_eq!(stats.dropped, 1);
    assert_eq!(outcomes.lock().unwrap().as_slice(), ["rec0005:dropped"]);

    assert!(logger.shutdown(Duration::from_secs(5)).await);
    assert_eq!(sink.len(), capacity);
    assert_eq!(count(&outcomes, "delivered"), capacity);
}

#[tokio::test]
async fn shutdown_drains_queued_records() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(10),
        calls: AtomicUsize::new(0),
    });
    let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone() as Arc<dyn LogSink>]));
    let logger = AsyncDelegateLogger::spawn(delegate, 64, 100);
    let outcomes = Outcomes::default();

    for n in 0..10 {
        logger.submit(tracked_record(n, &outcomes));
    }

    assert!(logger.shutdown(Duration::from_secs(5)).await);
    assert_eq!(logger.state(), LoggerState::Stopped);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 10);
    assert_eq!(logger.stats().dispatched, 10);
    assert_eq!(logger.stats().queued, 0);
    assert_eq!(count(&outcomes, "delivered"), 10);
}

#[tokio::test]
async fn shutdown_timeout_releases_remaining_records() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(200),
        calls: AtomicUsize::new(0),
    });
    let delegate = Arc::new(SyncDelegateLogger::new(vec![sink.clone() as Arc<dyn LogSink>]));
    let logger = AsyncDelegateLogger::spawn(delegate, 64, 100);
    let outcomes = Outcomes::default();

    for n in 0..5 {
        logger.submit(tracked_record(n, &outcomes));
    }

    assert!(!logger.shutdown(Duration::from_millis(50)).await);
    assert_eq!(logger.state(), LoggerState::Stopped);

    // The dispatch already running finishes on its blocking thread; the rest
    // are released without reaching the sink.
    assert!(common::eventually(|| outcomes.lock().unwrap().len() == 5).await);
    assert!(count(&outcomes, "dropped") >= 1);
    assert!(sink.calls.load(Ordering::SeqCst) < 5);
}

#[tokio::test]
async fn failed_delivery_preserves_capture_for_inspection() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Arc::new(BufferRepository::new(dir.path(), 1024).unwrap());
    let logger = Arc::new(SyncDelegateLogger::new(vec![
        Arc::new(FailingSink::default()) as Arc<dyn LogSink>
    ]));
    let pipeline = CapturePipeline::new(
        Arc::clone(&repository),
        Arc::new(HeaderPolicy::default()),
        logger,
    );

    let id = ExchangeId::from("keep0001");
    repository.write(Direction::Request, &id, b"payload").unwrap();
    pipeline.complete(CompletedExchange::new(id.clone(), "POST", "/submit"));

    assert_eq!(repository.active_buffers(), 0);
    assert_eq!(
        std::fs::read(repository.emergency_path(Direction::Request, &id)).unwrap(),
        b"payload"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_exchange_releases_its_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Arc::new(BufferRepository::new(dir.path(), 2).unwrap());
    let delegate = Arc::new(SyncDelegateLogger::new(vec![
        Arc::new(RecordingSink::default()) as Arc<dyn LogSink>
    ]));
    let logger = Arc::new(AsyncDelegateLogger::spawn(delegate, 1, 100));
    let pipeline = CapturePipeline::new(
        Arc::clone(&repository),
        Arc::new(HeaderPolicy::default()),
        logger.clone(),
    );

    let queued = ExchangeId::from("queued01");
    let overflow = ExchangeId::from("overflow");
    repository.write(Direction::Request, &queued, b"first").unwrap();
    repository.write(Direction::Request, &overflow, b"second").unwrap();
    let overflow_spill = repository.buffer_path(Direction::Request, &overflow);
    assert!(overflow_spill.exists());

    pipeline.complete(CompletedExchange::new(queued.clone(), "GET", "/a"));
    pipeline.complete(CompletedExchange::new(overflow.clone(), "GET", "/b"));

    assert_eq!(logger.stats().dropped, 1);
    assert!(!overflow_spill.exists());
    assert!(repository.size(Direction::Request, &queued).is_some());

    assert!(logger.shutdown(Duration::from_secs(5)).await);
    assert_eq!(repository.active_buffers(), 0);
}
