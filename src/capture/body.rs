//! Read view over a finished capture buffer.
//!
//! # Responsibilities
//! - Expose captured bytes whether they live in memory or on disk
//! - Undo `gzip` / `deflate` content encoding on the way out
//! - Report the raw captured size without decompressing

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// Content encodings the provider knows how to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Interpret a `Content-Encoding` header value.
    ///
    /// Unknown values and stacked encodings (`gzip, br`) read back raw.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return ContentEncoding::Identity;
        };

        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => ContentEncoding::Gzip,
            "deflate" => ContentEncoding::Deflate,
            _ => ContentEncoding::Identity,
        }
    }
}

/// Where the captured bytes live.
#[derive(Debug, Clone)]
pub enum BodySource {
    Memory(Bytes),
    Disk { path: PathBuf, len: u64 },
}

/// Lazy accessor for one captured body.
///
/// Nothing is read until [`open`](Self::open) or one of the convenience
/// readers is called, so sinks that ignore bodies pay nothing.
#[derive(Debug, Clone)]
pub struct BodyProvider {
    source: BodySource,
    encoding: ContentEncoding,
}

impl BodyProvider {
    pub fn new(source: BodySource, encoding: ContentEncoding) -> Self {
        Self { source, encoding }
    }

    /// Raw captured size in bytes, before any decoding.
    pub fn size(&self) -> u64 {
        match &self.source {
            BodySource::Memory(bytes) => bytes.len() as u64,
            BodySource::Disk { len, .. } => *len,
        }
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Backing file, if the body was spilled to disk.
    pub fn disk_path(&self) -> Option<&Path> {
        match &self.source {
            BodySource::Memory(_) => None,
            BodySource::Disk { path, .. } => Some(path),
        }
    }

    /// Reader over the bytes exactly as captured.
    pub fn open_raw(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            BodySource::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            BodySource::Disk { path, len } => Ok(Box::new(File::open(path)?.take(*len))),
        }
    }

    /// Reader over the decoded bytes.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let raw = self.open_raw()?;
        match self.encoding {
            ContentEncoding::Identity => Ok(raw),
            ContentEncoding::Gzip => Ok(Box::new(GzDecoder::new(raw))),
            ContentEncoding::Deflate => inflate(raw),
        }
    }

    /// Read and decode the whole body.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Read at most `limit` decoded bytes; the flag is true if more remained.
    pub fn read_prefix(&self, limit: usize) -> io::Result<(Vec<u8>, bool)> {
        let mut out = Vec::new();
        self.open()?
            .take(limit as u64 + 1)
            .read_to_end(&mut out)?;
        let truncated = out.len() > limit;
        out.truncate(limit);
        Ok((out, truncated))
    }
}

/// HTTP `deflate` is meant to be zlib-wrapped, but raw deflate streams are
/// common in the wild. Sniff the zlib header and pick the decoder.
fn inflate(raw: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
    let mut reader = BufReader::new(raw);
    let head = reader.fill_buf()?;
    let zlib = head.len() >= 2
        && head[0] & 0x0f == 8
        && ((u16::from(head[0]) << 8) | u16::from(head[1])) % 31 == 0;

    if zlib {
        Ok(Box::new(ZlibDecoder::new(reader)))
    } else {
        Ok(Box::new(DeflateDecoder::new(reader)))
    }
}
