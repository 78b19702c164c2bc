//! Exchange completion pipeline.
//!
//! # Responsibilities
//! - Turn a finished proxied exchange into an `ExchangeRecord`
//! - Apply the route's header policy to both header maps
//! - Attach lazy body providers from the buffer repository
//! - Decide, once logging is done, whether buffers are archived, released
//!   or preserved
//!
//! # Design Decisions
//! - Completion never fails the proxied exchange; a panic while assembling
//!   the record preserves the buffers instead
//! - Buffer release is tied to the record's finalizer, so every exit path
//!   (delivered, dropped, stopped) releases exactly once

use axum::http::header::CONTENT_ENCODING;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::access_log::delegate::ExchangeLogger;
use crate::access_log::record::{AuthUser, Disposition, ExchangeRecord, Finalizer};
use crate::capture::{ArchiveManager, BufferRepository, Direction, ExchangeId};
use crate::security::headers::HeaderPolicy;

/// Everything the proxy knows about an exchange once it is over.
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub id: ExchangeId,
    pub method: String,
    pub uri: String,
    pub route: String,
    /// Route policy already merged over the global one; `None` uses the global.
    pub policy: Option<Arc<HeaderPolicy>>,
    pub status: Option<u16>,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub remote_addr: Option<SocketAddr>,
    pub user: Option<AuthUser>,
    pub exception: Option<String>,
}

impl CompletedExchange {
    pub fn new(id: ExchangeId, method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            uri: uri.into(),
            route: String::new(),
            policy: None,
            status: None,
            request_headers: HeaderMap::new(),
            response_headers: HeaderMap::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            remote_addr: None,
            user: None,
            exception: None,
        }
    }
}

/// Glue between the proxy, the buffer repository and the logger.
pub struct CapturePipeline {
    repository: Arc<BufferRepository>,
    policy: Arc<HeaderPolicy>,
    archive: Option<ArchiveManager>,
    logger: Arc<dyn ExchangeLogger>,
}

impl CapturePipeline {
    pub fn new(
        repository: Arc<BufferRepository>,
        policy: Arc<HeaderPolicy>,
        logger: Arc<dyn ExchangeLogger>,
    ) -> Self {
        Self {
            repository,
            policy,
            archive: None,
            logger,
        }
    }

    /// Archive successfully logged exchanges instead of deleting them.
    pub fn with_archive(mut self, archive: ArchiveManager) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn repository(&self) -> &Arc<BufferRepository> {
        &self.repository
    }

    pub fn global_policy(&self) -> &Arc<HeaderPolicy> {
        &self.policy
    }

    pub fn logger(&self) -> &Arc<dyn ExchangeLogger> {
        &self.logger
    }

    /// Hand a finished exchange to the access log.
    pub fn complete(&self, exchange: CompletedExchange) {
        let id = exchange.id.clone();
        let assembled = panic::catch_unwind(AssertUnwindSafe(|| self.assemble(exchange)));

        match assembled {
            Ok(record) => self.logger.submit(record),
            Err(_) => {
                tracing::error!(exchange_id = %id, "Failed to assemble exchange record; preserving capture");
                self.repository.persist_for_error(&id);
            }
        }
    }

    fn assemble(&self, exchange: CompletedExchange) -> ExchangeRecord {
        let policy = exchange.policy.as_deref().unwrap_or(self.policy.as_ref());

        let request_encoding = content_encoding(&exchange.request_headers);
        let response_encoding = content_encoding(&exchange.response_headers);

        let mut record = ExchangeRecord::new(exchange.id.clone(), exchange.method, exchange.uri);
        record.route = exchange.route;
        record.status = exchange.status;
        record.request_headers = policy.filter(&exchange.request_headers);
        record.response_headers = policy.filter(&exchange.response_headers);
        record.timestamp = exchange.started_at;
        record.duration = exchange.duration;
        record.remote_addr = exchange.remote_addr;
        record.user = exchange.user;
        record.exception = exchange.exception;
        record.request_body = self
            .repository
            .get(Direction::Request, &exchange.id, request_encoding.as_deref());
        record.response_body = self
            .repository
            .get(Direction::Response, &exchange.id, response_encoding.as_deref());

        record.with_finalizer(self.finalizer())
    }

    fn finalizer(&self) -> Finalizer {
        let repository = Arc::clone(&self.repository);
        let archive = self.archive.clone();

        Box::new(move |record, disposition| match disposition {
            Disposition::Delivered(result) if result.is_ok() => match &archive {
                Some(archive) => {
                    if let Err(e) = archive.archive(record) {
                        tracing::warn!(
                            exchange_id = %record.id,
                            error = %e,
                            "Archival failed; preserving capture"
                        );
                        repository.persist_for_error(&record.id);
                    }
                }
                None => repository.cleanup(&record.id),
            },
            Disposition::Delivered(result) => {
                tracing::warn!(
                    exchange_id = %record.id,
                    failed_sinks = result.errors().len(),
                    buffer_dir = %repository.buffer_dir().display(),
                    "Exchange not fully logged; capture files left in place"
                );
                repository.persist_for_error(&record.id);
            }
            Disposition::Dropped => repository.cleanup(&record.id),
        })
    }
}

fn content_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
