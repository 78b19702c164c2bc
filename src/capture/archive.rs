//! Cold-storage archival of finished captures.
//!
//! # Layout
//! ```text
//! <base>/<yyyy-mm-dd>/<c1>/<c2>/<c3>/<c4>/<exchange id>/
//!     request.http
//!     response.http
//! ```
//! `c1..c4` are the first four characters of the exchange id. Generated ids
//! start with random characters, so exchanges spread evenly across shards
//! and no single directory's fan-out grows unbounded.

use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::access_log::ExchangeRecord;
use crate::capture::error::CaptureError;
use crate::capture::exchange::{Direction, ExchangeId, SHARD_PREFIX_LEN};
use crate::capture::repository::BufferRepository;
use crate::observability::metrics;

/// Number of id characters used as shard directories.
const SHARD_DEPTH: usize = SHARD_PREFIX_LEN;

/// Relocates finished captures into the sharded archive tree.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    base_dir: PathBuf,
    repository: Arc<BufferRepository>,
}

impl ArchiveManager {
    pub fn new(base_dir: impl Into<PathBuf>, repository: Arc<BufferRepository>) -> Self {
        Self {
            base_dir: base_dir.into(),
            repository,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory an exchange captured on `date` is archived into.
    pub fn shard_dir(&self, date: NaiveDate, id: &ExchangeId) -> Result<PathBuf, CaptureError> {
        if !id.is_path_safe() || id.as_str().chars().count() < SHARD_DEPTH {
            return Err(CaptureError::InvalidExchangeId(id.clone()));
        }

        let mut dir = self.base_dir.join(date.format("%Y-%m-%d").to_string());
        for c in id.as_str().chars().take(SHARD_DEPTH) {
            dir.push(c.to_string());
        }
        dir.push(id.as_str());
        Ok(dir)
    }

    /// Move the record's buffers into its archive directory.
    ///
    /// Idempotent: the directory may already exist from an earlier attempt.
    pub fn archive(&self, record: &ExchangeRecord) -> Result<PathBuf, CaptureError> {
        let dir = self.shard_dir(record.timestamp.date_naive(), &record.id)?;
        fs::create_dir_all(&dir).map_err(|e| CaptureError::io(&dir, e))?;

        self.repository
            .archive_into(&record.id, &dir, |direction| preamble(record, direction))?;

        metrics::record_archived();
        tracing::debug!(
            exchange_id = %record.id,
            path = %dir.display(),
            "Exchange archived"
        );
        Ok(dir)
    }
}

/// Start line and filtered headers for one half of the exchange, terminated
/// by the blank line that separates them from the body.
fn preamble(record: &ExchangeRecord, direction: Direction) -> String {
    let mut out = String::new();
    let headers = match direction {
        Direction::Request => {
            let _ = write!(out, "{} {}\r\n", record.method, record.uri);
            &record.request_headers
        }
        Direction::Response => {
            match record.status {
                Some(status) => {
                    let _ = write!(out, "{}\r\n", status);
                }
                None => out.push_str("-\r\n"),
            }
            &record.response_headers
        }
    };

    for (name, value) in headers.iter() {
        let _ = write!(out, "{}: {}\r\n", name, value);
    }
    out.push_str("\r\n");
    out
}
