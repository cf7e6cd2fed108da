//! Pingora ProxyHttp implementation for the edge gateway.
//!
//! Integrates Router and HealthTracker with Pingora's ProxyHttp trait
//! to route incoming HTTP requests to the registered upstreams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::{Method, Uri};
use pingora_core::prelude::*;
use pingora_core::protocols::Digest;
use pingora_http::RequestHeader;
use pingora_proxy::{FailToProxy, ProxyHttp, Session};

use super::response::{send_json, ErrorBody, GatewayInfo, HealthBody};
use super::upstream::{resolve_upstream, HealthTracker};
use super::Router;
use crate::config::UpstreamTimeouts;
use crate::store::{Route, UpstreamTarget};

/// Per-request context for the gateway proxy.
///
/// Carries the route chosen in `request_filter` through the rest of the
/// request lifecycle.
pub struct GatewayCtx {
    pub route: Option<Arc<Route>>,
    pub upstream_path: Option<String>,
    pub started: Instant,
}

impl GatewayCtx {
    pub fn new() -> Self {
        Self {
            route: None,
            upstream_path: None,
            started: Instant::now(),
        }
    }

    fn upstream_address(&self) -> Option<String> {
        self.route.as_ref().map(|r| r.target().address())
    }
}

impl Default for GatewayCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway proxy that routes HTTP requests by path prefix.
///
/// Answers `/` and `/health` itself, forwards everything with a matching
/// prefix, and turns every upstream failure into a local 503.
pub struct EdgeGateway {
    router: Router,
    tracker: Arc<HealthTracker>,
    timeouts: UpstreamTimeouts,
    /// How long an unhealthy upstream is skipped before a trial request.
    retry_after: Duration,
}

impl EdgeGateway {
    /// Creates a new EdgeGateway.
    pub fn new(
        router: Router,
        tracker: Arc<HealthTracker>,
        timeouts: UpstreamTimeouts,
        retry_after: Duration,
    ) -> Self {
        Self {
            router,
            tracker,
            timeouts,
            retry_after,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Creates an HttpPeer for an upstream.
    ///
    /// Resolves the target within the connect timeout and applies the
    /// configured connect/read/write budgets.
    async fn upstream_to_peer(&self, target: &UpstreamTarget) -> Result<HttpPeer> {
        let addr = match tokio::time::timeout(self.timeouts.connect, resolve_upstream(target)).await
        {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => {
                return Err(Error::because(
                    ErrorType::ConnectError,
                    format!("failed to resolve upstream {}", target.address()),
                    e,
                ))
            }
            Err(_) => {
                return Err(Error::explain(
                    ErrorType::ConnectTimedout,
                    format!("resolving upstream {} timed out", target.address()),
                ))
            }
        };

        let mut peer = HttpPeer::new(addr, target.is_tls(), target.sni().to_string());
        peer.options.connection_timeout = Some(self.timeouts.connect);
        peer.options.read_timeout = Some(self.timeouts.read);
        peer.options.write_timeout = Some(self.timeouts.write);
        Ok(peer)
    }
}

#[async_trait]
impl ProxyHttp for EdgeGateway {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let req = session.req_header();
        let method = req.method.clone();
        let path = req.uri.path().to_string();
        let query = req.uri.query().map(str::to_owned);

        if method == Method::GET || method == Method::HEAD {
            match path.as_str() {
                "/health" => return send_json(session, 200, &HealthBody::healthy()).await,
                "/" => {
                    let info = GatewayInfo::from_table(self.router.table(), &self.tracker);
                    return send_json(session, 200, &info).await;
                }
                _ => {}
            }
        }

        let Some(found) = self.router.resolve(&path, query.as_deref()) else {
            tracing::debug!(path = %path, "no route for path");
            return send_json(session, 404, &ErrorBody::not_found(&path)).await;
        };

        let address = found.route.target().address();
        ctx.route = Some(found.route);

        if !self.tracker.allow_request(&address, self.retry_after) {
            tracing::debug!(upstream = %address, "upstream unhealthy, skipping network call");
            return send_json(session, 503, &ErrorBody::unavailable()).await;
        }
        if !self.tracker.is_healthy(&address) {
            tracing::info!(upstream = %address, "trial request to unhealthy upstream");
        }

        ctx.upstream_path = Some(found.upstream_path);
        Ok(false)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let route = ctx.route.clone().ok_or_else(|| {
            Error::explain(ErrorType::InternalError, "no route selected for request")
        })?;

        match self.upstream_to_peer(route.target()).await {
            Ok(peer) => Ok(Box::new(peer)),
            Err(mut e) => {
                self.tracker.record_failure(&route.target().address());
                e.set_retry(false);
                Err(e.into_up())
            }
        }
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let (Some(route), Some(path)) = (ctx.route.as_ref(), ctx.upstream_path.as_deref()) else {
            return Err(Error::explain(
                ErrorType::InternalError,
                "upstream request without a resolved route",
            ));
        };
        rewrite_upstream_request(upstream_request, route.target(), path)
    }

    async fn connected_to_upstream(
        &self,
        _session: &mut Session,
        _reused: bool,
        _peer: &HttpPeer,
        _fd: std::os::unix::io::RawFd,
        _digest: Option<&Digest>,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(address) = ctx.upstream_address() {
            self.tracker.record_success(&address);
        }
        Ok(())
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        ctx: &mut Self::CTX,
        mut e: Box<Error>,
    ) -> Box<Error> {
        if let Some(address) = ctx.upstream_address() {
            self.tracker.record_failure(&address);
        }
        // No retries: a failed connect is reported to the client right away.
        e.set_retry(false);
        e
    }

    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy {
        let code = failure_status(e.etype(), e.esource());

        if code > 0 && session.response_written().is_none() {
            let upstream = ctx.route.as_ref().map(|r| r.target().url()).unwrap_or("-");
            tracing::warn!(
                upstream = upstream,
                status = code,
                error = %e,
                "proxy failure answered locally"
            );
            if let Err(write_err) = send_json(session, code, &ErrorBody::for_status(code)).await {
                tracing::debug!(error = %write_err, "failed to write error response");
            }
        }

        FailToProxy {
            error_code: code,
            can_reuse_downstream: false,
        }
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();
        let route = ctx.route.as_ref().map(|r| r.name()).unwrap_or("-");
        let upstream = ctx.route.as_ref().map(|r| r.target().url()).unwrap_or("-");
        let duration_ms = ctx.started.elapsed().as_millis() as u64;

        match e {
            Some(err) => tracing::warn!(
                method = method,
                path = path,
                status = status,
                route = route,
                upstream = upstream,
                duration_ms = duration_ms,
                error = %err,
                "request failed"
            ),
            None => tracing::info!(
                method = method,
                path = path,
                status = status,
                route = route,
                upstream = upstream,
                duration_ms = duration_ms,
                "request completed"
            ),
        }
    }
}

/// Points the outgoing request at the upstream.
///
/// Replaces the URI with the rewritten path and sets `Host` to the target's
/// authority. Method, other headers and the body are left untouched.
pub fn rewrite_upstream_request(
    request: &mut RequestHeader,
    target: &UpstreamTarget,
    path_and_query: &str,
) -> Result<()> {
    let uri = Uri::try_from(path_and_query).map_err(|e| {
        Error::because(
            ErrorType::InternalError,
            format!("invalid upstream path {}", path_and_query),
            e,
        )
    })?;
    request.set_uri(uri);
    request.insert_header("Host", target.authority())?;
    Ok(())
}

/// Maps a proxy failure to the status code sent downstream.
///
/// Upstream trouble of any kind is a 503. Downstream I/O failures get no
/// response at all (0). Explicit HTTP statuses pass through and everything
/// else is a 500.
pub fn failure_status(etype: &ErrorType, esource: &ErrorSource) -> u16 {
    if let ErrorType::HTTPStatus(code) = etype {
        return *code;
    }

    match esource {
        ErrorSource::Downstream => match etype {
            ErrorType::ReadError
            | ErrorType::WriteError
            | ErrorType::ConnectionClosed
            | ErrorType::ReadTimedout
            | ErrorType::WriteTimedout => 0,
            _ => 400,
        },
        ErrorSource::Upstream => 503,
        _ => match etype {
            ErrorType::ConnectTimedout
            | ErrorType::ConnectRefused
            | ErrorType::ConnectNoRoute
            | ErrorType::ConnectError
            | ErrorType::ConnectProxyFailure
            | ErrorType::TLSHandshakeFailure => 503,
            _ => 500,
        },
    }
}
