//! Body tee and exchange completion for proxied traffic.
//!
//! # Responsibilities
//! - Copy body chunks into the buffer repository as they stream through
//! - Stop capturing a direction on its first write error
//! - Complete the exchange exactly once: end of stream, stream error, or
//!   the response being dropped early
//!
//! # Design Decisions
//! - Forwarded bytes are never altered or delayed by a failed capture
//! - Repository writes run on the blocking pool; each chunk is written
//!   before the next one is forwarded, so chunk order is preserved
//! - A tap is closed before completion; a write either lands before the
//!   close or is skipped, so no buffer is recreated after cleanup

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use crate::access_log::{CapturePipeline, CompletedExchange};
use crate::capture::{BufferRepository, Direction, ExchangeId};
use crate::observability::metrics;

/// Item type of every body stream the proxy forwards.
pub type BodyChunk = Result<Bytes, axum::Error>;

#[derive(Debug, Default)]
struct TapGate {
    closed: bool,
    failed: bool,
}

/// Writes one direction of one exchange into the repository.
#[derive(Debug, Clone)]
pub struct CaptureTap {
    repository: Arc<BufferRepository>,
    id: ExchangeId,
    direction: Direction,
    gate: Arc<Mutex<TapGate>>,
}

impl CaptureTap {
    pub fn new(repository: Arc<BufferRepository>, id: ExchangeId, direction: Direction) -> Self {
        Self {
            repository,
            id,
            direction,
            gate: Arc::new(Mutex::new(TapGate::default())),
        }
    }

    /// Wrap `stream` so every data chunk is also captured.
    pub fn tee<S>(self, stream: S) -> BoxStream<'static, BodyChunk>
    where
        S: Stream<Item = BodyChunk> + Send + 'static,
    {
        stream
            .then(move |item| {
                let tap = self.clone();
                async move {
                    if let Ok(chunk) = &item {
                        tap.record(chunk.clone()).await;
                    }
                    item
                }
            })
            .boxed()
    }

    async fn record(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let tap = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || tap.write_blocking(&chunk)).await {
            tracing::warn!(exchange_id = %self.id, direction = %self.direction, error = %e, "Capture write task failed");
        }
    }

    fn write_blocking(&self, chunk: &[u8]) {
        let mut gate = self.gate.lock().expect("capture gate poisoned");
        if gate.closed || gate.failed {
            return;
        }

        if let Err(e) = self.repository.write(self.direction, &self.id, chunk) {
            gate.failed = true;
            metrics::record_write_failure(self.direction);
            tracing::warn!(
                exchange_id = %self.id,
                direction = %self.direction,
                error = %e,
                "Capture write failed; capture stopped for this direction"
            );
        }
    }

    /// Refuse further writes. Blocks until an in-flight write finishes.
    pub fn close(&self) {
        self.gate.lock().expect("capture gate poisoned").closed = true;
    }

    pub fn has_failed(&self) -> bool {
        self.gate.lock().expect("capture gate poisoned").failed
    }
}

struct PendingExchange {
    pipeline: Arc<CapturePipeline>,
    exchange: CompletedExchange,
    started: Instant,
    taps: Vec<CaptureTap>,
}

/// Completes an exchange exactly once.
///
/// Dropping an unfinished guard completes the exchange as aborted, so a
/// cancelled handler or a client that disconnects mid-body still releases
/// its capture buffers.
pub struct CompletionGuard {
    pending: Option<PendingExchange>,
}

impl CompletionGuard {
    pub fn new(pipeline: Arc<CapturePipeline>, exchange: CompletedExchange, started: Instant) -> Self {
        Self {
            pending: Some(PendingExchange {
                pipeline,
                exchange,
                started,
                taps: Vec::new(),
            }),
        }
    }

    pub fn add_tap(&mut self, tap: CaptureTap) {
        if let Some(pending) = self.pending.as_mut() {
            pending.taps.push(tap);
        }
    }

    pub fn set_response(&mut self, status: StatusCode, headers: HeaderMap) {
        if let Some(pending) = self.pending.as_mut() {
            pending.exchange.status = Some(status.as_u16());
            pending.exchange.response_headers = headers;
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if let Some(pending) = self.pending.as_mut() {
            pending.exchange.status = Some(status.as_u16());
        }
    }

    /// Hand the exchange to the pipeline. Later calls do nothing.
    pub fn complete(&mut self, exception: Option<String>) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        pending.exchange.duration = pending.started.elapsed();
        if pending.exchange.exception.is_none() {
            pending.exchange.exception = exception;
        }

        let run = move || {
            for tap in &pending.taps {
                tap.close();
            }
            pending.pipeline.complete(pending.exchange);
        };

        // Completion may touch disk and, in sync mode, run every sink.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(run);
            }
            Err(_) => run(),
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.pending.is_some() {
            self.complete(Some("exchange aborted before the response completed".to_string()));
        }
    }
}

/// Response body stream that completes its exchange when it ends.
///
/// With a known length the exchange completes as soon as the last declared
/// byte is yielded; the server stops polling a length-framed body at that
/// point instead of waiting for end of stream.
pub struct CompletionStream {
    inner: BoxStream<'static, BodyChunk>,
    guard: CompletionGuard,
    remaining: Option<u64>,
}

impl CompletionStream {
    pub fn new(inner: BoxStream<'static, BodyChunk>, guard: CompletionGuard) -> Self {
        Self {
            inner,
            guard,
            remaining: None,
        }
    }

    /// Declare how many body bytes the client will be sent.
    ///
    /// `Some(0)` completes the exchange immediately.
    pub fn with_expected_len(mut self, len: Option<u64>) -> Self {
        self.remaining = len;
        if len == Some(0) {
            self.guard.complete(None);
        }
        self
    }
}

impl Stream for CompletionStream {
    type Item = BodyChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(None) => this.guard.complete(None),
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(remaining) = this.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(chunk.len() as u64);
                    if *remaining == 0 {
                        this.guard.complete(None);
                    }
                }
            }
            Poll::Ready(Some(Err(e))) => {
                let message = format!("response body failed: {}", e);
                this.guard.complete(Some(message));
            }
            Poll::Pending => {}
        }
        polled
    }
}
