//! Capture engine error definitions.

use std::path::PathBuf;
use thiserror::Error;

use crate::capture::exchange::ExchangeId;

/// Errors raised by the buffer repository and the archiver.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Disk read or write failed.
    #[error("capture I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not open or seed the spill file when leaving memory mode.
    #[error("spillover to {path} failed: {source}")]
    Spillover {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Positioned writes kept making no progress.
    #[error("write to {path} stalled at offset {offset} after {attempts} attempts")]
    WriteStalled {
        path: PathBuf,
        offset: u64,
        attempts: u32,
    },

    /// The id cannot be used to build a file or shard path.
    #[error("exchange id {0:?} cannot be used as a storage path")]
    InvalidExchangeId(ExchangeId),
}

impl CaptureError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }
}
