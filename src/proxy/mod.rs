//! HTTP request routing and forwarding.
//!
//! Provides prefix routing of incoming requests to upstream services,
//! the Pingora proxy implementation, and upstream health tracking.

mod gateway;
mod response;
mod router;
mod upstream;

pub use gateway::{failure_status, rewrite_upstream_request, EdgeGateway, GatewayCtx};
pub use response::{timestamp, ErrorBody, GatewayInfo, HealthBody, RouteInfo};
pub use router::{RouteMatch, Router};
pub use upstream::{probe_upstream, resolve_upstream, HealthProbe, HealthStatus, HealthTracker};
