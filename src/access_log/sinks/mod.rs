//! Built-in log sinks and the factory that builds them from config.

pub mod json_lines;
pub mod tracing_sink;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::access_log::sink::LogSink;
use crate::config::SinkConfig;

pub use json_lines::JsonLinesSink;
pub use tracing_sink::TracingSink;

#[derive(Debug, Error)]
pub enum SinkBuildError {
    #[error("failed to open access log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Instantiate the configured sinks, preserving order.
pub fn build_sinks(configs: &[SinkConfig]) -> Result<Vec<Arc<dyn LogSink>>, SinkBuildError> {
    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::with_capacity(configs.len());
    for config in configs {
        match config {
            SinkConfig::JsonLines {
                path,
                include_bodies,
                max_body_bytes,
            } => {
                let sink = JsonLinesSink::open(path, *include_bodies, *max_body_bytes).map_err(|source| {
                    SinkBuildError::Open {
                        path: path.clone(),
                        source,
                    }
                })?;
                tracing::info!(path = %path.display(), include_bodies = include_bodies, "JSON lines sink ready");
                sinks.push(Arc::new(sink));
            }
            SinkConfig::Tracing => sinks.push(Arc::new(TracingSink::new())),
        }
    }
    Ok(sinks)
}
