//! Atlantiplex edge gateway.
//!
//! Loads configuration from the environment, builds the immutable route
//! table and runs the Pingora proxy until SIGTERM (graceful) or SIGINT.

use anyhow::{Context, Result};

use atlantiplex_gateway::{build_server, telemetry, GatewayConfig};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env().context("failed to load configuration")?;
    let _guard = telemetry::init(config.log_format);

    tracing::info!("atlantiplex-gateway starting");

    let server = build_server(&config)?;
    server.run_forever()
}
