//! Buffer repository.
//!
//! # Responsibilities
//! - Own every in-flight buffer, keyed by (exchange id, direction)
//! - Decide memory → disk spillover on each write
//! - Hand out read views once an exchange completes
//! - Release, archive, or preserve buffers when logging is done
//!
//! # Design Decisions
//! - Every mutation of a key goes through a single `DashMap` entry guard,
//!   so a write can never interleave with cleanup of the same key
//! - Contention is per shard, never global
//! - Disabled capture is the same type with writes dropped and reads absent

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::capture::body::{BodyProvider, BodySource, ContentEncoding};
use crate::capture::error::CaptureError;
use crate::capture::exchange::{Direction, ExchangeId};
use crate::capture::state::{BufferMode, BufferState};
use crate::config::CaptureConfig;
use crate::observability::metrics;

/// Table key: one direction of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    id: ExchangeId,
    direction: Direction,
}

impl BufferKey {
    fn new(id: &ExchangeId, direction: Direction) -> Self {
        Self {
            id: id.clone(),
            direction,
        }
    }
}

/// Concurrent owner of all capture buffers.
#[derive(Debug)]
pub struct BufferRepository {
    buffers: DashMap<BufferKey, BufferState>,
    buffer_dir: PathBuf,
    memory_threshold: usize,
    enabled: bool,
}

impl BufferRepository {
    /// Create an enabled repository spilling into `buffer_dir`.
    ///
    /// The directory is created if missing.
    pub fn new(buffer_dir: impl Into<PathBuf>, memory_threshold: usize) -> Result<Self, CaptureError> {
        let buffer_dir = buffer_dir.into();
        fs::create_dir_all(&buffer_dir).map_err(|e| CaptureError::io(&buffer_dir, e))?;

        Ok(Self {
            buffers: DashMap::new(),
            buffer_dir,
            memory_threshold,
            enabled: true,
        })
    }

    /// A repository that drops every write and never returns a body.
    pub fn disabled() -> Self {
        Self {
            buffers: DashMap::new(),
            buffer_dir: PathBuf::new(),
            memory_threshold: 0,
            enabled: false,
        }
    }

    /// Build from the `[capture]` config section.
    pub fn from_config(config: &CaptureConfig) -> Result<Self, CaptureError> {
        if !config.enabled {
            tracing::info!("Traffic capture disabled");
            return Ok(Self::disabled());
        }

        let repository = Self::new(&config.buffer_dir, config.memory_threshold_bytes)?;
        tracing::info!(
            buffer_dir = %repository.buffer_dir.display(),
            memory_threshold_bytes = repository.memory_threshold,
            "Traffic capture enabled"
        );
        Ok(repository)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn buffer_dir(&self) -> &Path {
        &self.buffer_dir
    }

    /// Spill file for one direction of an exchange.
    pub fn buffer_path(&self, direction: Direction, id: &ExchangeId) -> PathBuf {
        self.buffer_dir.join(format!("{}_{}.raw", id, direction))
    }

    /// File written by [`persist_for_error`](Self::persist_for_error) for a
    /// buffer that never left memory.
    pub fn emergency_path(&self, direction: Direction, id: &ExchangeId) -> PathBuf {
        self.buffer_dir.join(format!("{}_{}.error.raw", id, direction))
    }

    /// Append a chunk to the buffer for (id, direction).
    ///
    /// Chunks for one key must arrive from a single logical writer, in order.
    /// Empty chunks are ignored, so a body with no bytes never creates state.
    pub fn write(&self, direction: Direction, id: &ExchangeId, bytes: &[u8]) -> Result<(), CaptureError> {
        if !self.enabled || bytes.is_empty() {
            return Ok(());
        }

        let spill_path = self.buffer_path(direction, id);
        let spilled = match self.buffers.entry(BufferKey::new(id, direction)) {
            Entry::Occupied(mut entry) => {
                entry
                    .get_mut()
                    .append(bytes, self.memory_threshold, &spill_path)?
            }
            Entry::Vacant(entry) => {
                if !id.is_path_safe() {
                    return Err(CaptureError::InvalidExchangeId(id.clone()));
                }
                let (state, spilled) = BufferState::create(bytes, self.memory_threshold, &spill_path)?;
                entry.insert(state);
                spilled
            }
        };

        metrics::record_capture_bytes(direction, bytes.len());
        if spilled {
            metrics::record_spill(direction);
            tracing::debug!(
                exchange_id = %id,
                direction = %direction,
                path = %spill_path.display(),
                "Capture buffer spilled to disk"
            );
        }

        Ok(())
    }

    /// Read view over the buffer, or `None` if nothing was ever written.
    pub fn get(
        &self,
        direction: Direction,
        id: &ExchangeId,
        content_encoding: Option<&str>,
    ) -> Option<BodyProvider> {
        if !self.enabled {
            return None;
        }

        let entry = self.buffers.get(&BufferKey::new(id, direction))?;
        let source = match entry.value() {
            BufferState::InMemory(buf) => BodySource::Memory(Bytes::copy_from_slice(buf)),
            BufferState::OnDisk(disk) => BodySource::Disk {
                path: disk.path().to_path_buf(),
                len: disk.len(),
            },
        };

        Some(BodyProvider::new(
            source,
            ContentEncoding::from_header(content_encoding),
        ))
    }

    pub fn mode(&self, direction: Direction, id: &ExchangeId) -> Option<BufferMode> {
        self.buffers
            .get(&BufferKey::new(id, direction))
            .map(|entry| entry.value().mode())
    }

    /// Captured byte count for (id, direction).
    pub fn size(&self, direction: Direction, id: &ExchangeId) -> Option<u64> {
        self.buffers
            .get(&BufferKey::new(id, direction))
            .map(|entry| entry.value().len())
    }

    /// Number of live buffers across all exchanges.
    pub fn active_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Release both buffers of an exchange and delete their spill files.
    ///
    /// Safe to call any number of times.
    pub fn cleanup(&self, id: &ExchangeId) {
        for direction in Direction::ALL {
            let Some((_, state)) = self.buffers.remove(&BufferKey::new(id, direction)) else {
                continue;
            };

            if let BufferState::OnDisk(disk) = state {
                let path = disk.into_path();
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!(
                        exchange_id = %id,
                        path = %path.display(),
                        error = %e,
                        "Failed to delete capture file"
                    ),
                }
            }
        }
    }

    /// Best-effort preservation after the logging pipeline failed.
    ///
    /// In-memory buffers are flushed to emergency files; spill files are left
    /// where they are. Handles are closed and the entries released. Never fails.
    pub fn persist_for_error(&self, id: &ExchangeId) {
        for direction in Direction::ALL {
            let Some((_, state)) = self.buffers.remove(&BufferKey::new(id, direction)) else {
                continue;
            };

            match state {
                BufferState::InMemory(buf) => {
                    let path = self.emergency_path(direction, id);
                    match fs::write(&path, &buf) {
                        Ok(()) => {
                            metrics::record_emergency_persist();
                            tracing::warn!(
                                exchange_id = %id,
                                direction = %direction,
                                path = %path.display(),
                                bytes = buf.len(),
                                "Persisted in-memory capture after logging failure"
                            );
                        }
                        Err(e) => tracing::error!(
                            exchange_id = %id,
                            direction = %direction,
                            path = %path.display(),
                            error = %e,
                            "Failed to persist in-memory capture; data lost"
                        ),
                    }
                }
                BufferState::OnDisk(disk) => {
                    let path = disk.into_path();
                    tracing::warn!(
                        exchange_id = %id,
                        direction = %direction,
                        path = %path.display(),
                        "Leaving capture file in place after logging failure"
                    );
                }
            }
        }
    }

    /// Move both buffers of an exchange into `target_dir`.
    ///
    /// Each direction becomes one artifact, `<direction>.http`, holding the
    /// preamble produced by `preamble` followed by the body. Spill files are
    /// consumed (removed from the flat buffer directory) only once the artifact
    /// is written. A direction with no buffer gets a preamble-only artifact
    /// unless one already exists, so a retry never clobbers an earlier
    /// successful archive.
    pub fn archive_into<F>(
        &self,
        id: &ExchangeId,
        target_dir: &Path,
        preamble: F,
    ) -> Result<Vec<PathBuf>, CaptureError>
    where
        F: Fn(Direction) -> String,
    {
        let mut artifacts = Vec::with_capacity(2);

        for direction in Direction::ALL {
            let key = BufferKey::new(id, direction);
            let artifact = target_dir.join(format!("{}.http", direction));

            // The entry stays in the table until the artifact is complete, so a
            // failed archive can still fall back to persist_for_error.
            {
                let state = self.buffers.get(&key);
                if state.is_none() && artifact.exists() {
                    artifacts.push(artifact);
                    continue;
                }

                let mut out = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&artifact)
                    .map_err(|e| CaptureError::io(&artifact, e))?;

                out.write_all(preamble(direction).as_bytes())
                    .map_err(|e| CaptureError::io(&artifact, e))?;

                match state.as_deref() {
                    None => {}
                    Some(BufferState::InMemory(buf)) => {
                        out.write_all(buf).map_err(|e| CaptureError::io(&artifact, e))?;
                    }
                    Some(BufferState::OnDisk(disk)) => {
                        let mut input = File::open(disk.path()).map_err(|e| CaptureError::io(disk.path(), e))?;
                        io::copy(&mut input, &mut out).map_err(|e| CaptureError::io(&artifact, e))?;
                    }
                }

                out.flush().map_err(|e| CaptureError::io(&artifact, e))?;
            }

            if let Some((_, BufferState::OnDisk(disk))) = self.buffers.remove(&key) {
                let source = disk.into_path();
                fs::remove_file(&source).map_err(|e| CaptureError::io(&source, e))?;
            }
            artifacts.push(artifact);
        }

        Ok(artifacts)
    }
}
