//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Completed exchange:
//!     → headers.rs (route policy merged over global at startup)
//!     → resolve each header name: keep / redact / delete
//!     → filtered headers handed to log sinks and archive preambles
//! ```
//!
//! # Design Decisions
//! - `authorization` is always redacted, whatever the configuration says
//! - Headers that body decoding depends on are never altered
//! - Only captured copies are filtered; forwarded headers are untouched

pub mod headers;

pub use headers::{CapturedHeaders, HeaderPolicy, HeaderPolicyError, HeaderRule, REDACTED};
