//! Per-direction buffer state.
//!
//! # Responsibilities
//! - Accumulate one direction of one exchange in memory
//! - Spill to a disk file once the memory threshold is crossed
//! - Append to the disk file with positioned writes
//!
//! # Design Decisions
//! - Memory → disk is one-way; there is no variant that holds both
//! - Zero-progress writes are retried a fixed number of times, then fail loudly

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use crate::capture::error::CaptureError;

/// Consecutive zero-byte writes tolerated before giving up.
pub const MAX_STALLED_WRITES: u32 = 10;

/// Storage mode of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    InMemory,
    OnDisk,
}

/// Writes at an explicit offset without moving a shared cursor.
pub trait PositionalWrite {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

impl PositionalWrite for File {
    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }
}

/// Write all of `data` at `*offset`, advancing the offset by what was written.
///
/// A short write is continued from where it stopped. Only writes that make no
/// progress count against [`MAX_STALLED_WRITES`]; the counter resets whenever
/// bytes land.
pub fn write_fully<W: PositionalWrite + ?Sized>(
    target: &W,
    mut data: &[u8],
    offset: &mut u64,
    path: &Path,
) -> Result<(), CaptureError> {
    let mut stalled = 0;

    while !data.is_empty() {
        match target.write_at(data, *offset) {
            Ok(0) => {
                stalled += 1;
                if stalled >= MAX_STALLED_WRITES {
                    return Err(CaptureError::WriteStalled {
                        path: path.to_path_buf(),
                        offset: *offset,
                        attempts: stalled,
                    });
                }
                thread::yield_now();
            }
            Ok(written) => {
                *offset += written as u64;
                data = &data[written..];
                stalled = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CaptureError::io(path, e)),
        }
    }

    Ok(())
}

/// An open spill file and the position of the next write.
#[derive(Debug)]
pub struct DiskBuffer {
    file: File,
    path: PathBuf,
    offset: u64,
}

impl DiskBuffer {
    /// Create (or truncate) the spill file and seed it with `parts` in order.
    ///
    /// On failure the half-written file is removed.
    fn spill(path: &Path, parts: &[&[u8]]) -> Result<Self, CaptureError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| CaptureError::Spillover {
                path: path.to_path_buf(),
                source,
            })?;

        let mut disk = Self {
            file,
            path: path.to_path_buf(),
            offset: 0,
        };

        for part in parts {
            if let Err(e) = disk.append(part) {
                drop(disk);
                let _ = fs::remove_file(path);
                return Err(e);
            }
        }

        Ok(disk)
    }

    fn append(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        write_fully(&self.file, data, &mut self.offset, &self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.offset
    }

    /// Close the handle, keeping the file.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Capture progress for one (exchange, direction).
#[derive(Debug)]
pub enum BufferState {
    InMemory(Vec<u8>),
    OnDisk(DiskBuffer),
}

impl BufferState {
    /// Build the state for a first chunk.
    ///
    /// Returns the state and whether it went straight to disk.
    pub fn create(
        chunk: &[u8],
        threshold: usize,
        spill_path: &Path,
    ) -> Result<(Self, bool), CaptureError> {
        if chunk.len() > threshold {
            let disk = DiskBuffer::spill(spill_path, &[chunk])?;
            Ok((BufferState::OnDisk(disk), true))
        } else {
            Ok((BufferState::InMemory(chunk.to_vec()), false))
        }
    }

    /// Append a chunk, spilling to disk if the threshold would be exceeded.
    ///
    /// Returns true if this call performed the spill. On error the state is
    /// left as it was before the call.
    pub fn append(
        &mut self,
        chunk: &[u8],
        threshold: usize,
        spill_path: &Path,
    ) -> Result<bool, CaptureError> {
        match self {
            BufferState::InMemory(buf) if buf.len() + chunk.len() > threshold => {
                let disk = DiskBuffer::spill(spill_path, &[buf.as_slice(), chunk])?;
                *self = BufferState::OnDisk(disk);
                Ok(true)
            }
            BufferState::InMemory(buf) => {
                buf.extend_from_slice(chunk);
                Ok(false)
            }
            BufferState::OnDisk(disk) => {
                disk.append(chunk)?;
                Ok(false)
            }
        }
    }

    pub fn mode(&self) -> BufferMode {
        match self {
            BufferState::InMemory(_) => BufferMode::InMemory,
            BufferState::OnDisk(_) => BufferMode::OnDisk,
        }
    }

    /// Total bytes captured.
    pub fn len(&self) -> u64 {
        match self {
            BufferState::InMemory(buf) => buf.len() as u64,
            BufferState::OnDisk(disk) => disk.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
