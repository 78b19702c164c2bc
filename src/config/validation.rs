//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject ambiguous header policies before any exchange is captured
//! - Validate value ranges and addresses (queue capacity, plain-HTTP upstream URLs)
//! - Detect duplicate route names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::Uri;
use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{HeaderPolicyConfig, ProxyConfig, SinkConfig};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: String, value: String },

    #[error("{scope}: header policy defines both include and exclude rules")]
    AmbiguousHeaderPolicy { scope: String },

    #[error("capture.buffer_dir must not be empty when capture is enabled")]
    EmptyBufferDir,

    #[error("capture.archive.base_dir must not be empty when archival is enabled")]
    EmptyArchiveDir,

    #[error("access_log.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("access_log.sinks[{index}]: {reason}")]
    InvalidSink { index: usize, reason: String },

    #[error("route '{0}' is defined more than once")]
    DuplicateRoute(String),

    #[error("route '{route}': invalid upstream '{value}'")]
    InvalidUpstream { route: String, value: String },
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let capture = &config.capture;
    if capture.enabled && capture.buffer_dir.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyBufferDir);
    }
    if capture.archive.enabled && capture.archive.base_dir.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyArchiveDir);
    }
    check_policy(&mut errors, "capture.headers", &capture.headers);

    if config.access_log.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }
    for (index, sink) in config.access_log.sinks.iter().enumerate() {
        match sink {
            SinkConfig::JsonLines {
                path,
                max_body_bytes,
                include_bodies,
            } => {
                if path.as_os_str().is_empty() {
                    errors.push(ValidationError::InvalidSink {
                        index,
                        reason: "json_lines sink requires a path".to_string(),
                    });
                }
                if *include_bodies && *max_body_bytes == 0 {
                    errors.push(ValidationError::InvalidSink {
                        index,
                        reason: "max_body_bytes must be greater than zero when bodies are included".to_string(),
                    });
                }
            }
            SinkConfig::Tracing => {}
        }
    }

    let mut names = HashSet::new();
    for route in &config.routes {
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if !is_valid_upstream(&route.upstream) {
            errors.push(ValidationError::InvalidUpstream {
                route: route.name.clone(),
                value: route.upstream.clone(),
            });
        }
        if let Some(headers) = &route.headers {
            check_policy(&mut errors, &format!("routes.{}.headers", route.name), headers);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn check_policy(errors: &mut Vec<ValidationError>, scope: &str, policy: &HeaderPolicyConfig) {
    if policy.to_policy().is_err() {
        errors.push(ValidationError::AmbiguousHeaderPolicy {
            scope: scope.to_string(),
        });
    }
}

fn is_valid_upstream(value: &str) -> bool {
    match value.parse::<Uri>() {
        Ok(uri) => uri.scheme_str() == Some("http") && uri.authority().is_some(),
        Err(_) => false,
    }
}
