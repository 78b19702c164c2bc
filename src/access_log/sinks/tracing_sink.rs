//! Sink that emits each exchange as a tracing event.

use crate::access_log::record::ExchangeRecord;
use crate::access_log::result::LogSinkResult;
use crate::access_log::sink::LogSink;

/// Logs one `info` event per exchange on the `access_log` target.
///
/// Bodies are reported by size only and never read.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn dispatch(&self, record: &ExchangeRecord) -> LogSinkResult {
        let status = record.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        let remote = record
            .remote_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());

        tracing::info!(
            target: "access_log",
            exchange_id = %record.id,
            method = %record.method,
            uri = %record.uri,
            route = %record.route,
            status = %status,
            duration_ms = record.duration.as_millis() as u64,
            remote_addr = %remote,
            user = record.user.as_ref().map(|u| u.username.as_str()),
            request_bytes = record.request_body.as_ref().map(|b| b.size()),
            response_bytes = record.response_body.as_ref().map(|b| b.size()),
            exception = record.exception.as_deref(),
            "Exchange completed"
        );
        LogSinkResult::ok()
    }
}
