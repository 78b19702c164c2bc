//! Completed exchange record handed to log sinks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::access_log::result::LogSinkResult;
use crate::capture::{BodyProvider, ExchangeId};
use crate::security::headers::CapturedHeaders;

/// Identity attached by an upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub realm: String,
    pub username: String,
}

/// How a record left the logging pipeline.
#[derive(Debug, Clone, Copy)]
pub enum Disposition<'a> {
    /// Every sink was invoked; the combined result says whether any failed.
    Delivered(&'a LogSinkResult),
    /// The record never reached the sinks (queue full, logger stopped).
    Dropped,
}

/// Deferred release of the record's capture resources.
pub type Finalizer = Box<dyn FnOnce(&ExchangeRecord, Disposition<'_>) + Send>;

/// One proxied exchange, assembled after it completed.
///
/// Headers are already filtered by the header policy. Bodies are lazy: a sink
/// that never opens them never touches the capture buffers. A record that is
/// dropped without being finished runs its finalizer with
/// [`Disposition::Dropped`].
pub struct ExchangeRecord {
    pub id: ExchangeId,
    pub method: String,
    pub path: String,
    pub uri: String,
    pub route: String,
    pub status: Option<u16>,
    pub request_headers: CapturedHeaders,
    pub response_headers: CapturedHeaders,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub remote_addr: Option<SocketAddr>,
    pub user: Option<AuthUser>,
    pub exception: Option<String>,
    pub request_body: Option<BodyProvider>,
    pub response_body: Option<BodyProvider>,
    finalizer: Option<Finalizer>,
}

impl ExchangeRecord {
    pub fn new(id: ExchangeId, method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let path = uri
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string();

        Self {
            id,
            method: method.into(),
            path,
            uri,
            route: String::new(),
            status: None,
            request_headers: CapturedHeaders::default(),
            response_headers: CapturedHeaders::default(),
            timestamp: Utc::now(),
            duration: Duration::ZERO,
            remote_addr: None,
            user: None,
            exception: None,
            request_body: None,
            response_body: None,
            finalizer: None,
        }
    }

    /// Attach the action that releases this record's buffers.
    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// True until the finalizer has run.
    pub fn is_pending(&self) -> bool {
        self.finalizer.is_some()
    }

    /// Run the finalizer once; later calls do nothing.
    pub fn finish(&mut self, disposition: Disposition<'_>) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer(self, disposition);
        }
    }
}

impl Drop for ExchangeRecord {
    fn drop(&mut self) {
        self.finish(Disposition::Dropped);
    }
}

impl fmt::Debug for ExchangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRecord")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("route", &self.route)
            .field("status", &self.status)
            .field("duration", &self.duration)
            .field("exception", &self.exception)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
