//! HTTP server setup and the capturing proxy handler.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, timeout)
//! - Bind server to listener and stop on the shutdown broadcast
//! - Dispatch requests through the route table
//! - Forward requests to the upstream, teeing both bodies into capture
//! - Complete every exchange through the capture pipeline

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header::{HeaderName, CONTENT_LENGTH},
        HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use chrono::Utc;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::access_log::{AuthUser, CapturePipeline, CompletedExchange};
use crate::capture::{Direction, ExchangeId};
use crate::config::ProxyConfig;
use crate::http::capture::{CaptureTap, CompletionGuard, CompletionStream};
use crate::lifecycle::ShutdownListener;
use crate::routing::{RequestHead, RouteTable};

/// Header carrying the exchange id to the upstream and back to the client.
pub static X_EXCHANGE_ID: HeaderName = HeaderName::from_static("x-exchange-id");

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub pipeline: Arc<CapturePipeline>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP server for the capture proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ProxyConfig, routes: Arc<RouteTable>, pipeline: Arc<CapturePipeline>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            routes,
            pipeline,
            client,
        };

        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Run the server until `shutdown` fires and in-flight connections finish.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Looks up route, forwards the request, and captures both bodies.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let (mut parts, body) = request.into_parts();

    // 1. Match Route
    let route = match state.routes.match_head(&RequestHead::from_parts(&parts)) {
        Some(route) => route,
        None => {
            tracing::warn!(method = %parts.method, path = %parts.uri.path(), "No route matched");
            return (StatusCode::NOT_FOUND, "No matching route found").into_response();
        }
    };

    // 2. Open the exchange
    let id = ExchangeId::generate();
    let id_header = HeaderValue::from_str(id.as_str()).ok();
    if let Some(value) = &id_header {
        parts.headers.insert(X_EXCHANGE_ID.clone(), value.clone());
    }

    let mut exchange = CompletedExchange::new(id.clone(), parts.method.as_str(), parts.uri.to_string());
    exchange.route = route.name.clone();
    exchange.policy = Some(Arc::clone(&route.policy));
    exchange.request_headers = parts.headers.clone();
    exchange.started_at = Utc::now();
    exchange.remote_addr = Some(remote_addr);
    exchange.user = parts.extensions.get::<AuthUser>().cloned();

    let mut guard = CompletionGuard::new(Arc::clone(&state.pipeline), exchange, started);
    let repository = state.pipeline.repository();
    let capture = route.capture && repository.is_enabled();

    tracing::debug!(
        exchange_id = %id,
        route = %route.name,
        method = %parts.method,
        path = %parts.uri.path(),
        capture = capture,
        "Proxying request"
    );

    // 3. Tee the request body
    let body = if capture {
        let tap = CaptureTap::new(Arc::clone(repository), id.clone(), Direction::Request);
        guard.add_tap(tap.clone());
        Body::from_stream(tap.tee(body.into_data_stream()))
    } else {
        body
    };

    // 4. Rewrite the URI onto the upstream
    parts.uri = match upstream_uri(&route.upstream, &parts.uri) {
        Some(uri) => uri,
        None => {
            guard.set_status(StatusCode::BAD_GATEWAY);
            guard.complete(Some(format!("cannot map {} onto upstream {}", parts.uri, route.upstream)));
            return (StatusCode::BAD_GATEWAY, "Invalid upstream").into_response();
        }
    };

    // 5. Forward (the upstream client speaks HTTP/1.1)
    let method = parts.method.clone();
    parts.version = Version::HTTP_11;
    let upstream_request = Request::from_parts(parts, body);
    let response = match state.client.request(upstream_request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(exchange_id = %id, route = %route.name, error = %e, "Upstream error");
            guard.set_status(StatusCode::BAD_GATEWAY);
            guard.complete(Some(format!("upstream request failed: {}", e)));
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    // 6. Stream the response back, teeing and completing on end of body
    let (mut parts, incoming) = response.into_parts();
    let expected_len = response_body_len(&method, parts.status, &parts.headers);
    guard.set_response(parts.status, parts.headers.clone());

    let stream = Body::new(incoming).into_data_stream();
    let stream = if capture {
        let tap = CaptureTap::new(Arc::clone(repository), id.clone(), Direction::Response);
        guard.add_tap(tap.clone());
        tap.tee(stream)
    } else {
        futures_util::StreamExt::boxed(stream)
    };

    if let Some(value) = id_header {
        parts.headers.insert(X_EXCHANGE_ID.clone(), value);
    }

    let body = CompletionStream::new(stream, guard).with_expected_len(expected_len);
    Response::from_parts(parts, Body::from_stream(body))
}

/// Body bytes the client will receive, when the framing says so up front.
fn response_body_len(method: &Method, status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Some(0);
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Upstream scheme and authority, upstream path as prefix, request path and
/// query appended.
fn upstream_uri(upstream: &Uri, original: &Uri) -> Option<Uri> {
    let base = upstream.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(upstream.scheme()?.clone())
        .authority(upstream.authority()?.clone())
        .path_and_query(format!("{}{}", base, path_and_query))
        .build()
        .ok()
}
