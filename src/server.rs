//! Assembles the Pingora server from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use pingora_core::prelude::*;
use pingora_proxy::http_proxy_service;

use crate::config::GatewayConfig;
use crate::health::{HealthListener, Readiness};
use crate::proxy::{EdgeGateway, HealthProbe, HealthTracker, Router};

/// Builds a bootstrapped server with the proxy service and, depending on
/// configuration, the health probe and the out-of-band health listener.
///
/// SIGTERM drains in-flight requests for up to `SHUTDOWN_TIMEOUT_SECS`;
/// SIGINT exits immediately.
pub fn build_server(config: &GatewayConfig) -> Result<Server> {
    let table = Arc::new(config.route_table().context("invalid route table")?);
    for route in table.routes() {
        tracing::info!(
            prefix = route.prefix(),
            target = route.target().url(),
            name = route.name(),
            "route registered"
        );
    }

    let tracker = Arc::new(HealthTracker::new(config.health_check.failure_threshold));

    let mut server = Server::new_with_opt_and_conf(None, config.server_conf());
    server.bootstrap();

    let gateway = EdgeGateway::new(
        Router::new(Arc::clone(&table)),
        Arc::clone(&tracker),
        config.timeouts,
        config.health_check.interval,
    );
    let mut proxy = http_proxy_service(&server.configuration, gateway);
    proxy.add_tcp(&config.listen_addr.to_string());
    server.add_service(proxy);

    if config.health_check.enabled {
        let probe = HealthProbe::new(
            Arc::clone(&table),
            Arc::clone(&tracker),
            config.health_check.interval,
            config.health_check.timeout,
        );
        server.add_service(background_service("upstream health probe", probe));
    }

    if let Some(addr) = config.health_addr() {
        let listener = HealthListener::new(addr, Readiness::new(Arc::clone(&table), tracker));
        server.add_service(background_service("health listener", listener));
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        routes = table.len(),
        health_checks = config.health_check.enabled,
        health_port = ?config.health_port,
        "gateway initialized"
    );

    Ok(server)
}
