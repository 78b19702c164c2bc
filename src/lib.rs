//! HTTP traffic capture proxy library.
//!
//! Buffers proxied request and response bodies (memory first, spilling to
//! disk), and feeds each completed exchange through a pluggable access log
//! pipeline that decides whether the captured bytes are archived, released
//! or preserved.

pub mod access_log;
pub mod capture;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
