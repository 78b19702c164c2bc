//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use traffic_capture::access_log::{ExchangeRecord, LogSink, LogSinkResult};
use traffic_capture::config::ProxyConfig;
use traffic_capture::lifecycle::{self, Services, Shutdown};
use traffic_capture::HttpServer;

/// What a recording sink saw for one exchange.
#[derive(Debug, Clone)]
pub struct Seen {
    pub id: String,
    pub status: Option<u16>,
    pub exception: Option<String>,
    pub request_body: Option<Vec<u8>>,
    pub response_body: Option<Vec<u8>>,
    pub request_headers: Vec<(String, String)>,
}

/// Sink that keeps a copy of everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    pub seen: Mutex<Vec<Seen>>,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn dispatch(&self, record: &ExchangeRecord) -> LogSinkResult {
        self.seen.lock().unwrap().push(Seen {
            id: record.id.to_string(),
            status: record.status,
            exception: record.exception.clone(),
            request_body: record.request_body.as_ref().map(|b| b.to_bytes().unwrap()),
            response_body: record.response_body.as_ref().map(|b| b.to_bytes().unwrap()),
            request_headers: record
                .request_headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        });
        LogSinkResult::ok()
    }
}

/// Sink that always reports failure.
#[derive(Default)]
pub struct FailingSink {
    pub calls: AtomicUsize,
}

impl LogSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LogSinkResult::failed("failing", "disk full")
    }
}

/// Sink that panics on every record.
pub struct PanickingSink;

impl LogSink for PanickingSink {
    fn name(&self) -> &str {
        "panicking"
    }

    fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
        panic!("sink bug");
    }
}

/// Sink that blocks each dispatch for a fixed time.
pub struct SlowSink {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl LogSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn dispatch(&self, _record: &ExchangeRecord) -> LogSinkResult {
        std::thread::sleep(self.delay);
        self.calls.fetch_add(1, Ordering::SeqCst);
        LogSinkResult::ok()
    }
}

/// Start a mock backend on an ephemeral port.
///
/// Reads the whole request (Content-Length framed) before replying with
/// `response` and an `x-upstream-secret` header.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(serve_one(socket, response));
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn serve_one(mut socket: TcpStream, response: &'static str) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let chunked = head
        .lines()
        .any(|l| l.starts_with("transfer-encoding:") && l.contains("chunked"));
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let complete = |buf: &[u8]| {
        if chunked {
            buf[header_end..].ends_with(b"0\r\n\r\n")
        } else {
            buf.len() >= header_end + content_length
        }
    };

    while !complete(&buf) {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nX-Upstream-Secret: s3cret\r\nConnection: close\r\n\r\n{}",
        response.len(),
        response
    );
    let _ = socket.write_all(reply.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A running proxy.
pub struct Proxy {
    pub addr: SocketAddr,
    pub services: Services,
    pub shutdown: Shutdown,
    pub server: tokio::task::JoinHandle<()>,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and drain the access log.
    pub async fn stop(self) -> Services {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
        self.services.logger.shutdown(Duration::from_secs(5)).await;
        self.services
    }
}

/// Start the full proxy stack for `config` on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig) -> Proxy {
    let services = lifecycle::start(&config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, services.routes.clone(), services.pipeline.clone());
    let listener_shutdown = shutdown.subscribe();
    let server = tokio::spawn(async move {
        server.run(listener, listener_shutdown).await.unwrap();
    });

    Proxy {
        addr,
        services,
        shutdown,
        server,
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
