//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the capture
//! proxy. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::security::headers::{HeaderPolicy, HeaderPolicyError, HeaderRule};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Body capture and buffering.
    pub capture: CaptureConfig,

    /// Access log pipeline.
    pub access_log: AccessLogConfig,

    /// Route definitions mapping requests to upstreams.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response head) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Header include/exclude block.
///
/// Keys are header names, values are `keep`, `redact` or `delete`. A single
/// block may define one of the two sets, not both.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct HeaderPolicyConfig {
    pub include: BTreeMap<String, HeaderRule>,
    pub exclude: BTreeMap<String, HeaderRule>,
}

impl HeaderPolicyConfig {
    pub fn to_policy(&self) -> Result<HeaderPolicy, HeaderPolicyError> {
        HeaderPolicy::try_new(
            self.include.iter().map(|(k, v)| (k, *v)),
            self.exclude.iter().map(|(k, v)| (k, *v)),
        )
    }
}

/// Capture buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Master switch; when off no body bytes are buffered.
    pub enabled: bool,

    /// Directory for spill files and emergency persists.
    pub buffer_dir: PathBuf,

    /// Bytes a single buffer may hold in memory before spilling to disk.
    pub memory_threshold_bytes: usize,

    /// Global header policy.
    pub headers: HeaderPolicyConfig,

    /// Archival of successfully logged exchanges.
    pub archive: ArchiveConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_dir: PathBuf::from("capture/buffers"),
            memory_threshold_bytes: 1024 * 1024, // 1 MiB
            headers: HeaderPolicyConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

/// Archive configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub base_dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_dir: PathBuf::from("capture/archive"),
        }
    }
}

/// How completed exchanges reach the sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Dispatch on the request task.
    Sync,
    /// Bounded queue drained by a background worker.
    #[default]
    Async,
}

/// Access log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    pub mode: DispatchMode,

    /// Queue capacity for async mode; records beyond it are dropped.
    pub queue_capacity: usize,

    /// Time allowed to drain the queue on shutdown.
    pub shutdown_grace_secs: u64,

    /// Log a drop warning at most once per this many drops.
    pub drop_log_threshold: u64,

    /// Sinks, invoked in order.
    pub sinks: Vec<SinkConfig>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Async,
            queue_capacity: 10_000,
            shutdown_grace_secs: 5,
            drop_log_threshold: 100,
            sinks: vec![SinkConfig::Tracing],
        }
    }
}

/// One configured sink.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// One JSON object per line in a file.
    JsonLines {
        path: PathBuf,
        #[serde(default)]
        include_bodies: bool,
        #[serde(default = "default_max_body_bytes")]
        max_body_bytes: usize,
    },
    /// Structured event on the `access_log` tracing target.
    Tracing,
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

/// Route configuration mapping requests to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Upstream base URL (e.g., "http://127.0.0.1:3000").
    pub upstream: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Capture bodies for this route.
    #[serde(default = "default_capture")]
    pub capture: bool,

    /// Route-local header rules layered over the global policy.
    #[serde(default)]
    pub headers: Option<HeaderPolicyConfig>,
}

fn default_capture() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.capture.memory_threshold_bytes, 1024 * 1024);
        assert_eq!(config.access_log.mode, DispatchMode::Async);
        assert_eq!(config.access_log.queue_capacity, 10_000);
        assert_eq!(config.access_log.sinks, vec![SinkConfig::Tracing]);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [capture]
            buffer_dir = "/tmp/buffers"
            memory_threshold_bytes = 4096

            [capture.headers.exclude]
            cookie = "redact"
            x-internal = "delete"

            [capture.archive]
            enabled = true
            base_dir = "/tmp/archive"

            [access_log]
            mode = "sync"

            [[access_log.sinks]]
            type = "json_lines"
            path = "/tmp/access.jsonl"
            include_bodies = true

            [[access_log.sinks]]
            type = "tracing"

            [[routes]]
            name = "api"
            path_prefix = "/api"
            upstream = "http://127.0.0.1:3000"
            priority = 10

            [routes.headers.include]
            x-request-id = "keep"
        "#;

        let config: ProxyConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.capture.memory_threshold_bytes, 4096);
        assert_eq!(config.capture.headers.exclude.get("cookie"), Some(&HeaderRule::Redact));
        assert!(config.capture.archive.enabled);
        assert_eq!(config.access_log.mode, DispatchMode::Sync);
        assert_eq!(
            config.access_log.sinks[0],
            SinkConfig::JsonLines {
                path: PathBuf::from("/tmp/access.jsonl"),
                include_bodies: true,
                max_body_bytes: 64 * 1024,
            }
        );
        let route = &config.routes[0];
        assert!(route.capture);
        assert_eq!(
            route.headers.as_ref().unwrap().include.get("x-request-id"),
            Some(&HeaderRule::Keep)
        );
    }
}
