//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the capture and logging subsystems from a validated config
//! - Initialize them in dependency order
//! - Hand the assembled services to the HTTP server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::access_log::{
    build_sinks, AsyncDelegateLogger, CapturePipeline, ExchangeLogger, SinkBuildError, SyncDelegateLogger,
};
use crate::capture::{ArchiveManager, BufferRepository, CaptureError};
use crate::config::{DispatchMode, ProxyConfig};
use crate::routing::{RouteError, RouteTable};
use crate::security::headers::HeaderPolicyError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("capture repository: {0}")]
    Capture(#[from] CaptureError),

    #[error("access log sinks: {0}")]
    Sinks(#[from] SinkBuildError),

    #[error("global header policy: {0}")]
    Policy(#[from] HeaderPolicyError),

    #[error("routes: {0}")]
    Routes(#[from] RouteError),
}

/// The logger in whichever mode was configured.
#[derive(Clone)]
pub enum LoggerHandle {
    Sync(Arc<SyncDelegateLogger>),
    Async(Arc<AsyncDelegateLogger>),
}

impl LoggerHandle {
    pub fn as_logger(&self) -> Arc<dyn ExchangeLogger> {
        match self {
            LoggerHandle::Sync(logger) => Arc::clone(logger) as Arc<dyn ExchangeLogger>,
            LoggerHandle::Async(logger) => Arc::clone(logger) as Arc<dyn ExchangeLogger>,
        }
    }

    /// Stop the logger, draining queued records for up to `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        match self {
            LoggerHandle::Sync(logger) => {
                logger.stop();
                true
            }
            LoggerHandle::Async(logger) => logger.shutdown(grace).await,
        }
    }
}

/// Everything the server needs, built once at startup.
pub struct Services {
    pub repository: Arc<BufferRepository>,
    pub pipeline: Arc<CapturePipeline>,
    pub logger: LoggerHandle,
    pub routes: Arc<RouteTable>,
}

/// Build the services described by `config`.
///
/// Async dispatch spawns its worker, so this must run inside a tokio runtime.
pub fn start(config: &ProxyConfig) -> Result<Services, StartupError> {
    let repository = Arc::new(BufferRepository::from_config(&config.capture)?);

    let sinks = build_sinks(&config.access_log.sinks)?;
    let delegate = SyncDelegateLogger::new(sinks);
    tracing::info!(sinks = ?delegate.sink_names(), mode = ?config.access_log.mode, "Access log configured");

    let logger = match config.access_log.mode {
        DispatchMode::Sync => LoggerHandle::Sync(Arc::new(delegate)),
        DispatchMode::Async => LoggerHandle::Async(Arc::new(AsyncDelegateLogger::spawn(
            Arc::new(delegate),
            config.access_log.queue_capacity,
            config.access_log.drop_log_threshold,
        ))),
    };

    let global_policy = Arc::new(config.capture.headers.to_policy()?);

    let mut pipeline = CapturePipeline::new(
        Arc::clone(&repository),
        Arc::clone(&global_policy),
        logger.as_logger(),
    );
    if config.capture.archive.enabled {
        tracing::info!(base_dir = %config.capture.archive.base_dir.display(), "Capture archival enabled");
        pipeline = pipeline.with_archive(ArchiveManager::new(
            config.capture.archive.base_dir.clone(),
            Arc::clone(&repository),
        ));
    }

    let routes = Arc::new(RouteTable::from_config(&config.routes, &global_policy)?);
    if routes.is_empty() {
        tracing::warn!("No routes configured; every request will receive 404");
    }

    Ok(Services {
        repository,
        pipeline: Arc::new(pipeline),
        logger,
        routes,
    })
}
