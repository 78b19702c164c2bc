//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, `exchange_id` on every capture event)
//!     → metrics.rs (capture and access log counters, queue depth gauge)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Exchange ID flows through all capture and logging events
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
