//! Upstream health tracking and probing.
//!
//! Health is fed from two sides: the gateway reports the outcome of every
//! upstream connect, and the [`HealthProbe`] background service checks each
//! upstream on a fixed interval. Requests to an upstream marked unhealthy
//! are answered with 503 without touching the network.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::store::{RouteTable, UpstreamTarget};

/// Health status of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy)]
struct UpstreamHealth {
    status: HealthStatus,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl Default for UpstreamHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_failure: None,
        }
    }
}

/// Tracks health status of upstreams, keyed by `host:port`.
///
/// Thread-safe via DashMap. Unknown upstreams are considered healthy.
/// After `failure_threshold` consecutive failures, an upstream is marked unhealthy.
/// A single success restores the upstream to healthy status. While
/// unhealthy, one trial request is let through per retry window so the
/// upstream can recover without an active probe.
pub struct HealthTracker {
    upstreams: DashMap<String, UpstreamHealth>,
    failure_threshold: u32,
}

impl HealthTracker {
    /// Creates a new HealthTracker with the given failure threshold.
    ///
    /// A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            upstreams: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Records a successful connect to an upstream.
    ///
    /// Returns `true` if the upstream was unhealthy and is now restored.
    pub fn record_success(&self, address: &str) -> bool {
        let mut entry = self.upstreams.entry(address.to_string()).or_default();
        let recovered = entry.status == HealthStatus::Unhealthy;
        entry.consecutive_failures = 0;
        entry.status = HealthStatus::Healthy;
        drop(entry);

        if recovered {
            tracing::info!(upstream = address, "upstream recovered");
        }
        recovered
    }

    /// Records a failed connect to an upstream.
    ///
    /// Returns `true` if this failure crossed the threshold and marked the
    /// upstream unhealthy.
    pub fn record_failure(&self, address: &str) -> bool {
        let mut entry = self.upstreams.entry(address.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure = Some(Instant::now());

        let tripped = entry.status == HealthStatus::Healthy
            && entry.consecutive_failures >= self.failure_threshold;
        if tripped {
            entry.status = HealthStatus::Unhealthy;
        }
        let failures = entry.consecutive_failures;
        drop(entry);

        if tripped {
            tracing::warn!(
                upstream = address,
                consecutive_failures = failures,
                "upstream marked unhealthy"
            );
        }
        tripped
    }

    /// Returns the status of an upstream. Unknown upstreams are healthy.
    pub fn status(&self, address: &str) -> HealthStatus {
        self.upstreams
            .get(address)
            .map(|h| h.status)
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn is_healthy(&self, address: &str) -> bool {
        self.status(address) == HealthStatus::Healthy
    }

    /// Decides whether a request may go out to an upstream.
    ///
    /// Healthy upstreams always admit. An unhealthy upstream admits a single
    /// trial once `retry_after` has passed since its last failure; admitting
    /// restarts the window, so concurrent requests keep short-circuiting
    /// until the trial settles the status.
    pub fn allow_request(&self, address: &str, retry_after: Duration) -> bool {
        let Some(mut entry) = self.upstreams.get_mut(address) else {
            return true;
        };
        if entry.status == HealthStatus::Healthy {
            return true;
        }

        let due = entry
            .last_failure
            .map_or(true, |at| at.elapsed() >= retry_after);
        if due {
            entry.last_failure = Some(Instant::now());
        }
        due
    }

    /// Returns the count of healthy upstreams from the given list.
    pub fn healthy_count(&self, targets: &[UpstreamTarget]) -> usize {
        targets
            .iter()
            .filter(|t| self.is_healthy(&t.address()))
            .count()
    }
}

/// Resolves an upstream to a socket address.
///
/// Literal IP addresses are used directly; host names go through the
/// system resolver and the first address wins.
pub async fn resolve_upstream(target: &UpstreamTarget) -> io::Result<SocketAddr> {
    let address = target.address();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let resolved = tokio::net::lookup_host(&address)
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", address),
            )
        });
    resolved
}

/// Checks that an upstream accepts TCP connections within `timeout`.
pub async fn probe_upstream(target: &UpstreamTarget, timeout: Duration) -> io::Result<()> {
    let attempt = async {
        let addr = resolve_upstream(target).await?;
        TcpStream::connect(addr).await.map(drop)
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "health probe timed out"))?
}

/// Background service that probes every distinct upstream on an interval.
pub struct HealthProbe {
    table: Arc<RouteTable>,
    tracker: Arc<HealthTracker>,
    interval: Duration,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        table: Arc<RouteTable>,
        tracker: Arc<HealthTracker>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            table,
            tracker,
            interval,
            timeout,
        }
    }

    /// Probes all upstreams concurrently and records the outcomes.
    pub async fn probe_once(&self) {
        let mut probes = JoinSet::new();

        for target in self.table.upstreams() {
            let tracker = Arc::clone(&self.tracker);
            let timeout = self.timeout;
            probes.spawn(async move {
                let address = target.address();
                match probe_upstream(&target, timeout).await {
                    Ok(()) => {
                        tracker.record_success(&address);
                    }
                    Err(e) => {
                        tracing::debug!(upstream = %address, error = %e, "health probe failed");
                        tracker.record_failure(&address);
                    }
                }
            });
        }

        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "health probe task panicked");
            }
        }
    }
}

#[async_trait]
impl BackgroundService for HealthProbe {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            upstreams = self.table.upstreams().len(),
            "upstream health probe started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("upstream health probe stopped");
                    return;
                }
                _ = ticker.tick() => self.probe_once().await,
            }
        }
    }
}
