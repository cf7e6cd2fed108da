//! Out-of-band HTTP health server for orchestrator probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) on a separate
//! port so probes keep working when the proxy listener is saturated.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::net::TcpListener;

use crate::proxy::HealthTracker;
use crate::store::RouteTable;

/// Readiness view over the route table and upstream health.
pub struct Readiness {
    table: Arc<RouteTable>,
    tracker: Arc<HealthTracker>,
}

impl Readiness {
    pub fn new(table: Arc<RouteTable>, tracker: Arc<HealthTracker>) -> Self {
        Self { table, tracker }
    }

    /// Ready while at least one upstream is healthy.
    pub fn is_ready(&self) -> bool {
        self.tracker.healthy_count(&self.table.upstreams()) > 0
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Handles health check requests.
///
/// `/healthz` is always 200 "ok". `/readyz` is 200 "ready" or
/// 503 "not ready". Everything else is 404.
pub async fn health_handler<B>(
    req: Request<B>,
    readiness: &Readiness,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => text_response(StatusCode::OK, "ok"),
        "/readyz" if readiness.is_ready() => text_response(StatusCode::OK, "ready"),
        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Starts the HTTP health server on the given address.
///
/// Runs indefinitely, accepting connections and handling health requests.
pub async fn start_health_server(addr: SocketAddr, readiness: Arc<Readiness>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let readiness = Arc::clone(&readiness);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let readiness = Arc::clone(&readiness);
                async move { health_handler(req, &readiness).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "health connection error");
            }
        });
    }
}

/// Runs the health server as a Pingora background service.
pub struct HealthListener {
    addr: SocketAddr,
    readiness: Arc<Readiness>,
}

impl HealthListener {
    pub fn new(addr: SocketAddr, readiness: Readiness) -> Self {
        Self {
            addr,
            readiness: Arc::new(readiness),
        }
    }
}

#[async_trait]
impl BackgroundService for HealthListener {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        tracing::info!(addr = %self.addr, "health listener started");

        tokio::select! {
            result = start_health_server(self.addr, Arc::clone(&self.readiness)) => {
                if let Err(e) = result {
                    tracing::error!(addr = %self.addr, error = %e, "health listener failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("health listener stopped");
            }
        }
    }
}
