//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define capture and access log metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `capture_bytes_total` (counter): body bytes buffered, by direction
//! - `capture_spills_total` (counter): memory → disk transitions, by direction
//! - `capture_write_failures_total` (counter): failed capture writes, by direction
//! - `capture_emergency_persists_total` (counter): in-memory buffers written out after a logging failure
//! - `capture_archived_total` (counter): exchanges moved into the archive
//! - `access_log_dispatched_total` (counter): records handed to every sink
//! - `access_log_dropped_total` (counter): records dropped before dispatch
//! - `access_log_sink_errors_total` (counter): sink failures, by sink
//! - `access_log_queue_depth` (gauge): records waiting for the async worker
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code and
//!   tests call these freely

use std::net::SocketAddr;

use crate::capture::Direction;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_capture_bytes(direction: Direction, bytes: usize) {
    ::metrics::counter!("capture_bytes_total", "direction" => direction.as_str()).increment(bytes as u64);
}

pub fn record_spill(direction: Direction) {
    ::metrics::counter!("capture_spills_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_write_failure(direction: Direction) {
    ::metrics::counter!("capture_write_failures_total", "direction" => direction.as_str()).increment(1);
}

pub fn record_emergency_persist() {
    ::metrics::counter!("capture_emergency_persists_total").increment(1);
}

pub fn record_archived() {
    ::metrics::counter!("capture_archived_total").increment(1);
}

pub fn record_dispatched() {
    ::metrics::counter!("access_log_dispatched_total").increment(1);
}

pub fn record_dropped() {
    ::metrics::counter!("access_log_dropped_total").increment(1);
}

pub fn record_sink_error(sink: &str) {
    ::metrics::counter!("access_log_sink_errors_total", "sink" => sink.to_string()).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    ::metrics::gauge!("access_log_queue_depth").set(depth as f64);
}
