//! Log sink capability.

use crate::access_log::record::ExchangeRecord;
use crate::access_log::result::LogSinkResult;

/// A pluggable consumer of completed exchanges.
///
/// Sinks are called from the dispatcher's thread, never from the proxy's I/O
/// path. They must not assume bodies are present (capture may be disabled) or
/// already read into memory.
pub trait LogSink: Send + Sync {
    /// Stable name used in errors and metrics.
    fn name(&self) -> &str;

    fn dispatch(&self, record: &ExchangeRecord) -> LogSinkResult;
}

/// Observer notified after every dispatch with the combined result.
pub trait DispatchListener: Send + Sync {
    fn on_dispatch(&self, record: &ExchangeRecord, result: &LogSinkResult);
}
