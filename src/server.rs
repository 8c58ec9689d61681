//! Observability Server
//!
//! Small HTTP/1 endpoint exposing the process's own view of its metrics:
//!
//! - `GET /ping` → `pong`
//! - `GET /health` → health response JSON, 503 when not operational
//! - `GET /metrics-text` → current registry in line protocol

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::filter::MetricFilter;
use crate::health::HealthCheckRegistry;
use crate::registry::MetricRegistry;
use crate::sink::line_protocol::encode_snapshot;
use crate::snapshot::{EnvironmentInfo, Snapshot};

/// State read by the request handlers
#[derive(Debug, Clone)]
pub struct ServerState {
    pub registry: Arc<MetricRegistry>,
    pub health: Arc<HealthCheckRegistry>,
    pub environment: EnvironmentInfo,
}

/// Bound observability endpoint
pub struct ObservabilityServer {
    listener: TcpListener,
    state: ServerState,
}

impl ObservabilityServer {
    /// Bind to `addr` (`host:port`)
    pub async fn bind(addr: &str, state: ServerState) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid health server address '{}': {}", addr, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

        Ok(Self { listener, state })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        info!("Health server listening on {}", self.local_addr()?);
        let Self { listener, state } = self;
        let state = Arc::new(state);

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted
                    .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?,
            };

            let io = TokioIo::new(stream);
            let state = Arc::clone(&state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle(&state, &req)) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(%peer, "Health server connection error: {}", e);
                }
            });
        }

        info!("Health server stopped");
        Ok(())
    }
}

fn handle<B>(state: &ServerState, req: &Request<B>) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), path = req.uri().path(), "Observability request");

    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match req.uri().path() {
        "/ping" => text(StatusCode::OK, "pong"),
        "/health" => health(state),
        "/metrics-text" => metrics_text(state),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn health(state: &ServerState) -> Response<Full<Bytes>> {
    let report = state.health.check_all();
    let status = if report.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    match serde_json::to_vec(&report) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!("Failed to serialize health response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn metrics_text(state: &ServerState) -> Response<Full<Bytes>> {
    let snapshot = Snapshot::capture(&state.registry, &MetricFilter::All)
        .with_environment(state.environment.clone());
    let payload = encode_snapshot(&snapshot);
    respond(StatusCode::OK, "text/plain; charset=utf-8", payload.body)
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    respond(status, "text/plain; charset=utf-8", body)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
