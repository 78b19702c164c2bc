//! Synchronous fan-out to log sinks.
//!
//! # Responsibilities
//! - Invoke every configured sink, in order, for one record
//! - Isolate sink failures, including panics, from each other
//! - Notify listeners with the combined result
//!
//! # Design Decisions
//! - A failing sink never stops later sinks from seeing the record
//! - The caller decides what to do with the buffers based on the result

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::access_log::record::{Disposition, ExchangeRecord};
use crate::access_log::result::LogSinkResult;
use crate::access_log::sink::{DispatchListener, LogSink};
use crate::observability::metrics;

/// Lifecycle of a delegate logger.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    Idle = 0,
    Dispatching = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for LoggerState {
    fn from(val: u8) -> Self {
        match val {
            1 => LoggerState::Dispatching,
            2 => LoggerState::Draining,
            3 => LoggerState::Stopped,
            _ => LoggerState::Idle,
        }
    }
}

/// Entry point used by the completion pipeline.
pub trait ExchangeLogger: Send + Sync {
    /// Take ownership of a completed record and see it through to its
    /// finalizer, now or later.
    fn submit(&self, record: ExchangeRecord);

    fn state(&self) -> LoggerState;
}

/// Dispatches records to sinks on the calling thread.
pub struct SyncDelegateLogger {
    sinks: Vec<Arc<dyn LogSink>>,
    listeners: Vec<Arc<dyn DispatchListener>>,
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl SyncDelegateLogger {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self {
            sinks,
            listeners: Vec::new(),
            state: AtomicU8::new(LoggerState::Idle as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn DispatchListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Run every sink against `record` and return the combined result.
    pub fn dispatch(&self, record: &ExchangeRecord) -> LogSinkResult {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) == 0 {
            let _ = self.state.compare_exchange(
                LoggerState::Idle as u8,
                LoggerState::Dispatching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let mut result = LogSinkResult::ok();
        for sink in &self.sinks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.dispatch(record)))
                .unwrap_or_else(|payload| {
                    LogSinkResult::failed(sink.name(), format!("panicked: {}", panic_message(&*payload)))
                });

            for error in outcome.errors() {
                metrics::record_sink_error(&error.sink);
                tracing::warn!(
                    exchange_id = %record.id,
                    sink = %error.sink,
                    error = %error.message,
                    "Log sink failed"
                );
            }
            result.merge(outcome);
        }

        for listener in &self.listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_dispatch(record, &result))).is_err() {
                tracing::warn!(exchange_id = %record.id, "Dispatch listener panicked");
            }
        }

        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.state.compare_exchange(
                LoggerState::Dispatching as u8,
                LoggerState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        result
    }

    /// Refuse further records; submitted records are released as dropped.
    pub fn stop(&self) {
        self.state.store(LoggerState::Stopped as u8, Ordering::Release);
    }
}

impl ExchangeLogger for SyncDelegateLogger {
    fn submit(&self, mut record: ExchangeRecord) {
        if self.state() == LoggerState::Stopped {
            tracing::warn!(exchange_id = %record.id, "Access log stopped; exchange not logged");
            metrics::record_dropped();
            record.finish(Disposition::Dropped);
            return;
        }

        let result = self.dispatch(&record);
        metrics::record_dispatched();
        record.finish(Disposition::Delivered(&result));
    }

    fn state(&self) -> LoggerState {
        LoggerState::from(self.state.load(Ordering::Acquire))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ExchangeId;
    use std::sync::Mutex;

    struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl LogSink for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
            self.1.lock().unwrap().push(self.0);
            LogSinkResult::ok()
        }
    }

    struct Panics;

    impl LogSink for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
            panic!("sink exploded");
        }
    }

    struct Counting(Mutex<Vec<bool>>);

    impl DispatchListener for Counting {
        fn on_dispatch(&self, _record: &ExchangeRecord, result: &LogSinkResult) {
            self.0.lock().unwrap().push(result.is_ok());
        }
    }

    #[test]
    fn sinks_run_in_configured_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let logger = SyncDelegateLogger::new(vec![
            Arc::new(Named("first", calls.clone())),
            Arc::new(Named("second", calls.clone())),
        ]);

        let record = ExchangeRecord::new(ExchangeId::from("abcd1"), "GET", "/");
        assert!(logger.dispatch(&record).is_ok());
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(logger.state(), LoggerState::Idle);
    }

    #[test]
    fn panicking_sink_is_isolated_and_reported() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let listener = Arc::new(Counting(Mutex::new(Vec::new())));
        let logger = SyncDelegateLogger::new(vec![
            Arc::new(Panics),
            Arc::new(Named("after", calls.clone())),
        ])
        .with_listener(listener.clone());

        let record = ExchangeRecord::new(ExchangeId::from("abcd1"), "GET", "/");
        let result = logger.dispatch(&record);

        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].sink, "panics");
        assert!(result.errors()[0].message.contains("sink exploded"));
        assert_eq!(*calls.lock().unwrap(), vec!["after"]);
        assert_eq!(*listener.0.lock().unwrap(), vec![false]);
    }

    #[test]
    fn stopped_logger_releases_records_as_dropped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let logger = SyncDelegateLogger::new(vec![Arc::new(Named("only", calls.clone()))]);
        logger.stop();

        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let record = ExchangeRecord::new(ExchangeId::from("abcd1"), "GET", "/").with_finalizer(Box::new(
            move |_, disposition| {
                *seen_in.lock().unwrap() = Some(matches!(disposition, Disposition::Dropped));
            },
        ));

        logger.submit(record);

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert_eq!(logger.state(), LoggerState::Stopped);
    }
}
