//! Access log subsystem.
//!
//! # Data Flow
//! ```text
//! Exchange complete (proxy)
//!     → pipeline.rs (filter headers, attach body providers, finalizer)
//!     → ExchangeLogger::submit
//!         sync:  delegate.rs (sinks in order, on the caller)
//!         async: worker.rs (bounded queue → worker → delegate.rs)
//!     → sink.rs / sinks/ (json_lines, tracing)
//!     → LogSinkResult → finalizer:
//!         ok      → archive or cleanup
//!         errors  → persist_for_error
//!         dropped → cleanup
//! ```
//!
//! # Design Decisions
//! - One sink's failure never hides the record from the others
//! - Saturation drops records rather than blocking request tasks
//! - Buffer release happens exactly once, through the record's finalizer

pub mod delegate;
pub mod pipeline;
pub mod record;
pub mod result;
pub mod sink;
pub mod sinks;
pub mod worker;

pub use delegate::{ExchangeLogger, LoggerState, SyncDelegateLogger};
pub use pipeline::{CapturePipeline, CompletedExchange};
pub use record::{AuthUser, Disposition, ExchangeRecord, Finalizer};
pub use result::{LogSinkResult, SinkError};
pub use sink::{DispatchListener, LogSink};
pub use sinks::{build_sinks, JsonLinesSink, SinkBuildError, TracingSink};
pub use worker::{AsyncDelegateLogger, DispatchStats, DispatchStatsSnapshot};
