//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, route lookup, exchange id)
//!     → capture.rs (request body tee → repository)
//!     → upstream (hyper client)
//!     → capture.rs (response body tee → repository, completion guard)
//!     → Send to client
//!     → end of body / error / disconnect → access_log pipeline
//! ```

pub mod capture;
pub mod server;

pub use capture::{CaptureTap, CompletionGuard, CompletionStream};
pub use server::{HttpServer, X_EXCHANGE_ID};
