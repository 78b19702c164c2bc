//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, header policy ambiguity)
//!     → ProxyConfig (validated, immutable)
//!     → startup builds repository, sinks, logger and route table from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AccessLogConfig, ArchiveConfig, CaptureConfig, DispatchMode, HeaderPolicyConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, ProxyConfig, RouteConfig, SinkConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
