//! Pingora-based edge router for the Atlantiplex platform.
//!
//! Forwards requests to the studio, catalog, admin, dashboard and API
//! services by path prefix, answers unroutable paths and unavailable
//! upstreams with JSON errors, and tracks upstream health.

pub mod config;
pub mod error;
pub mod health;
pub mod proxy;
pub mod server;
pub mod store;
pub mod telemetry;

pub use config::{GatewayConfig, LogFormat, UpstreamTimeouts};
pub use error::{ConfigError, RouteError};
pub use proxy::{EdgeGateway, HealthTracker, Router};
pub use server::build_server;
pub use store::{Route, RouteTable, UpstreamTarget};
