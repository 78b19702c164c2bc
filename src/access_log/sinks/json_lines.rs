//! Line-oriented JSON file sink.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::access_log::record::{AuthUser, ExchangeRecord};
use crate::access_log::result::LogSinkResult;
use crate::access_log::sink::LogSink;
use crate::capture::BodyProvider;
use crate::security::headers::CapturedHeaders;

const SINK_NAME: &str = "json_lines";

/// Appends one JSON object per exchange to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    include_bodies: bool,
    max_body_bytes: usize,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl Into<PathBuf>, include_bodies: bool, max_body_bytes: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            include_bodies,
            max_body_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render_body(&self, body: Option<&BodyProvider>) -> io::Result<Option<BodyLine>> {
        let Some(body) = body else {
            return Ok(None);
        };

        if !self.include_bodies {
            return Ok(Some(BodyLine {
                size: body.size(),
                text: None,
                truncated: false,
            }));
        }

        let (bytes, truncated) = body.read_prefix(self.max_body_bytes)?;
        Ok(Some(BodyLine {
            size: body.size(),
            text: Some(String::from_utf8_lossy(&bytes).into_owned()),
            truncated,
        }))
    }

    fn write_line(&self, record: &ExchangeRecord) -> io::Result<()> {
        let line = AccessLine {
            id: record.id.as_str(),
            timestamp: record.timestamp.to_rfc3339(),
            method: &record.method,
            uri: &record.uri,
            path: &record.path,
            route: &record.route,
            status: record.status,
            duration_ms: record.duration.as_secs_f64() * 1000.0,
            remote_addr: record.remote_addr.map(|a| a.to_string()),
            user: record.user.as_ref(),
            exception: record.exception.as_deref(),
            request_headers: &record.request_headers,
            response_headers: &record.response_headers,
            request_body: self.render_body(record.request_body.as_ref())?,
            response_body: self.render_body(record.response_body.as_ref())?,
        };

        let mut encoded = serde_json::to_vec(&line).map_err(io::Error::other)?;
        encoded.push(b'\n');

        let mut writer = self.writer.lock().expect("json lines writer poisoned");
        writer.write_all(&encoded)?;
        writer.flush()
    }
}

impl LogSink for JsonLinesSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn dispatch(&self, record: &ExchangeRecord) -> LogSinkResult {
        match self.write_line(record) {
            Ok(()) => LogSinkResult::ok(),
            Err(e) => LogSinkResult::failed(SINK_NAME, format!("{}: {}", self.path.display(), e)),
        }
    }
}

#[derive(Serialize)]
struct AccessLine<'a> {
    id: &'a str,
    timestamp: String,
    method: &'a str,
    uri: &'a str,
    path: &'a str,
    route: &'a str,
    status: Option<u16>,
    duration_ms: f64,
    remote_addr: Option<String>,
    user: Option<&'a AuthUser>,
    exception: Option<&'a str>,
    request_headers: &'a CapturedHeaders,
    response_headers: &'a CapturedHeaders,
    request_body: Option<BodyLine>,
    response_body: Option<BodyLine>,
}

#[derive(Serialize)]
struct BodyLine {
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    truncated: bool,
}
