//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → repository → sinks → logger → pipeline → routes
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → in-flight exchanges complete
//!     → access log drains (grace period) → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Log drain has a timeout: records left after it are released as dropped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{shutdown_signal, spawn_signal_handler};
pub use startup::{start, LoggerHandle, Services, StartupError};
