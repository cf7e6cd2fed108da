//! Configuration management.
//!
//! Reads every setting from the environment once at startup. Values that
//! are present but malformed abort startup instead of silently falling back
//! to defaults.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use pingora_core::server::configuration::ServerConf;

use crate::error::{ConfigError, RouteError};
use crate::store::RouteTable;

/// Upstreams of the platform: (prefix, env var, default URL, display name).
pub const DEFAULT_UPSTREAMS: [(&str, &str, &str, &str); 5] = [
    ("/studio", "VITE_STUDIO_URL", "http://localhost:5173", "Atlantiplex Studio"),
    ("/products", "VITE_CATALOG_URL", "http://localhost:5174", "Product Catalog"),
    ("/admin", "VITE_ADMIN_URL", "http://localhost:5175", "Admin Panel"),
    ("/dashboard", "VITE_DASHBOARD_URL", "http://localhost:5176", "Dashboard"),
    ("/api", "VITE_API_BASE", "http://localhost:8080", "API"),
];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format {:?}, expected json or pretty", other)),
        }
    }
}

/// One upstream entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub prefix: String,
    pub url: String,
    pub name: String,
}

/// Budgets applied to every upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(2_000),
            read: Duration::from_millis(30_000),
            write: Duration::from_millis(30_000),
        }
    }
}

/// Active health checking of upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(5_000),
            timeout: Duration::from_millis(1_000),
            failure_threshold: 3,
        }
    }
}

/// Graceful shutdown behaviour on SIGTERM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Drain window: listeners are closed and in-flight requests keep
    /// being served for this many seconds.
    pub drain_secs: u64,
    /// Bound on tearing down the worker runtimes once draining ends.
    pub runtime_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_secs: 10,
            runtime_timeout_secs: 5,
        }
    }
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the gateway listens on.
    pub listen_addr: SocketAddr,
    /// Upstreams in registration order.
    pub upstreams: Vec<UpstreamConfig>,
    pub timeouts: UpstreamTimeouts,
    pub health_check: HealthCheckConfig,
    /// Port of the out-of-band `/healthz` and `/readyz` listener, if any.
    pub health_port: Option<u16>,
    pub shutdown: ShutdownConfig,
    /// Worker threads for the proxy service.
    pub worker_threads: usize,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let host: IpAddr = env.parse_or("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = env.parse_or("PORT", 3000)?;

        let upstreams = DEFAULT_UPSTREAMS
            .iter()
            .map(|(prefix, key, default, name)| UpstreamConfig {
                prefix: prefix.to_string(),
                url: env.get(key).unwrap_or_else(|| default.to_string()),
                name: name.to_string(),
            })
            .collect();

        let timeouts = UpstreamTimeouts {
            connect: env.millis_or("UPSTREAM_CONNECT_TIMEOUT_MS", 2_000)?,
            read: env.millis_or("UPSTREAM_READ_TIMEOUT_MS", 30_000)?,
            write: env.millis_or("UPSTREAM_WRITE_TIMEOUT_MS", 30_000)?,
        };

        let health_check = HealthCheckConfig {
            enabled: env.bool_or("HEALTH_CHECK_ENABLED", true)?,
            interval: env.millis_or("HEALTH_CHECK_INTERVAL_MS", 5_000)?,
            timeout: env.millis_or("HEALTH_CHECK_TIMEOUT_MS", 1_000)?,
            failure_threshold: env.parse_or("HEALTH_FAILURE_THRESHOLD", 3)?,
        };
        if health_check.failure_threshold == 0 {
            return Err(ConfigError::OutOfRange {
                key: "HEALTH_FAILURE_THRESHOLD",
                reason: "must be at least 1".to_string(),
            });
        }

        let health_port = env.parse_opt::<u16>("HEALTH_PORT")?;
        if health_port == Some(port) {
            return Err(ConfigError::OutOfRange {
                key: "HEALTH_PORT",
                reason: format!("must differ from PORT ({})", port),
            });
        }

        let shutdown = ShutdownConfig {
            drain_secs: env.parse_or("SHUTDOWN_TIMEOUT_SECS", 10)?,
            runtime_timeout_secs: env.parse_or("SHUTDOWN_RUNTIME_TIMEOUT_SECS", 5)?,
        };

        let worker_threads: usize = env.parse_or("WORKER_THREADS", 1)?;
        if worker_threads == 0 {
            return Err(ConfigError::OutOfRange {
                key: "WORKER_THREADS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            listen_addr: SocketAddr::new(host, port),
            upstreams,
            timeouts,
            health_check,
            health_port,
            shutdown,
            worker_threads,
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Json)?,
        })
    }

    /// Builds the immutable route table from the configured upstreams.
    pub fn route_table(&self) -> Result<RouteTable, RouteError> {
        let mut builder = RouteTable::builder();
        for upstream in &self.upstreams {
            builder.register_route(&upstream.prefix, &upstream.url, &upstream.name)?;
        }
        Ok(builder.build())
    }

    /// Address of the out-of-band health listener, on the gateway's interface.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_port
            .map(|port| SocketAddr::new(self.listen_addr.ip(), port))
    }

    /// Pingora server settings derived from this configuration.
    pub fn server_conf(&self) -> ServerConf {
        ServerConf {
            threads: self.worker_threads,
            grace_period_seconds: Some(self.shutdown.drain_secs),
            graceful_shutdown_timeout_seconds: Some(self.shutdown.runtime_timeout_secs),
            ..ServerConf::default()
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn millis_or(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let millis: u64 = self.parse_or(key, default)?;
        if millis == 0 {
            return Err(ConfigError::OutOfRange {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Duration::from_millis(millis))
    }

    fn bool_or(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}
