//! Immutable route table built once at startup.

use std::collections::HashSet;
use std::sync::Arc;

use http::Uri;

use crate::error::RouteError;

/// Scheme of an upstream base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Parsed base URL of an upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    url: String,
    scheme: UpstreamScheme,
    host: String,
    port: u16,
    base_path: String,
}

impl UpstreamTarget {
    /// Parses an absolute `http://` or `https://` base URL.
    ///
    /// A trailing `/` on the base path is dropped, so `http://api:8080/v1/`
    /// and `http://api:8080/v1` are the same target.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let raw = raw.trim();
        let invalid = |reason: &str| RouteError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = raw.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => UpstreamScheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => UpstreamScheme::Https,
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        };

        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        if authority.as_str().contains('@') {
            return Err(invalid("credentials are not supported in upstream URLs"));
        }
        let host = authority.host().to_ascii_lowercase();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if uri.query().is_some() {
            return Err(invalid("query strings are not supported in upstream URLs"));
        }

        let port = authority.port_u16().unwrap_or(scheme.default_port());
        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            url: raw.trim_end_matches('/').to_string(),
            scheme,
            host,
            port,
            base_path,
        })
    }

    /// The URL as configured, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == UpstreamScheme::Https
    }

    /// Path prepended to every forwarded request. Empty for bare origins.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Value for the forwarded `Host` header.
    ///
    /// The port is omitted when it is the scheme's default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` used for name resolution and health tracking.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Server name for TLS, with IPv6 brackets removed.
    pub fn sni(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }
}

/// One `(prefix, target, name)` entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    prefix: String,
    target: UpstreamTarget,
    name: String,
}

impl Route {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered, read-only set of routes.
///
/// Shared between the proxy service, the health probe and the health
/// listener through an `Arc`. There is no way to mutate a table once built.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Routes in registration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Distinct upstream targets, keyed by address, in registration order.
    pub fn upstreams(&self) -> Vec<UpstreamTarget> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .map(|r| r.target())
            .filter(|t| seen.insert(t.address()))
            .cloned()
            .collect()
    }
}

/// Collects routes during startup.
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: Vec<Arc<Route>>,
}

impl RouteTableBuilder {
    /// Registers a route.
    ///
    /// Returns `Ok(false)` when a route with the same prefix already exists;
    /// the first registration wins and the new one is dropped.
    pub fn register_route(
        &mut self,
        prefix: &str,
        target: &str,
        name: &str,
    ) -> Result<bool, RouteError> {
        let prefix = normalize_prefix(prefix)?;
        if target.trim().is_empty() {
            return Err(RouteError::EmptyTarget { prefix });
        }
        let target = UpstreamTarget::parse(target)?;

        if let Some(existing) = self.routes.iter().find(|r| r.prefix == prefix) {
            tracing::warn!(
                prefix = %prefix,
                kept = %existing.target.url(),
                dropped = %target.url(),
                "duplicate route prefix ignored"
            );
            return Ok(false);
        }

        let name = if name.trim().is_empty() {
            prefix.trim_start_matches('/').to_string()
        } else {
            name.trim().to_string()
        };

        self.routes.push(Arc::new(Route {
            prefix,
            target,
            name,
        }));
        Ok(true)
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            routes: self.routes,
        }
    }
}

fn normalize_prefix(prefix: &str) -> Result<String, RouteError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(RouteError::EmptyPrefix);
    }
    if !prefix.starts_with('/') {
        return Err(RouteError::RelativePrefix(prefix.to_string()));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RouteError::RootPrefix);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== Upstream target parsing ==========

    #[test]
    fn test_parse_http_target_with_port() {
        let target = UpstreamTarget::parse("http://localhost:5173").unwrap();
        assert_eq!(target.port(), 5173);
        assert_eq!(target.address(), "localhost:5173");
        assert_eq!(target.authority(), "localhost:5173");
        assert_eq!(target.base_path(), "");
        assert!(!target.is_tls());
    }

    #[test]
    fn test_parse_https_default_port_omitted_from_authority() {
        let target = UpstreamTarget::parse("https://api.example.com").unwrap();
        assert!(target.is_tls());
        assert_eq!(target.port(), 443);
        assert_eq!(target.address(), "api.example.com:443");
        assert_eq!(target.authority(), "api.example.com");
        assert_eq!(target.sni(), "api.example.com");
    }

    #[test]
    fn test_parse_target_with_base_path() {
        let target = UpstreamTarget::parse("http://api:8080/v1/").unwrap();
        assert_eq!(target.base_path(), "/v1");
        assert_eq!(target.url(), "http://api:8080/v1");
    }

    #[test]
    fn test_parse_ipv6_target() {
        let target = UpstreamTarget::parse("http://[::1]:9000").unwrap();
        assert_eq!(target.address(), "[::1]:9000");
        assert_eq!(target.sni(), "::1");
    }

    #[test]
    fn test_parse_rejects_missing_scheme() {
        assert!(matches!(
            UpstreamTarget::parse("localhost:5173"),
            Err(RouteError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unsupported_scheme() {
        assert!(matches!(
            UpstreamTarget::parse("ftp://files.local"),
            Err(RouteError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_query_string() {
        assert!(UpstreamTarget::parse("http://api:8080/?debug=1").is_err());
    }

    // ========== Registration ==========

    #[test]
    fn test_register_route_preserves_order() {
        let mut builder = RouteTable::builder();
        builder
            .register_route("/studio", "http://localhost:5173", "Studio")
            .unwrap();
        builder
            .register_route("/api", "http://localhost:8080", "API")
            .unwrap();
        let table = builder.build();

        let prefixes: Vec<&str> = table.routes().iter().map(|r| r.prefix()).collect();
        assert_eq!(prefixes, vec!["/studio", "/api"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_register_route_trims_trailing_slash() {
        let mut builder = RouteTable::builder();
        builder
            .register_route("/admin/", "http://localhost:5175", "Admin")
            .unwrap();
        assert_eq!(builder.build().routes()[0].prefix(), "/admin");
    }

    #[test]
    fn test_duplicate_prefix_first_registration_wins() {
        let mut builder = RouteTable::builder();
        assert!(builder
            .register_route("/api", "http://first:8080", "first")
            .unwrap());
        assert!(!builder
            .register_route("/api/", "http://second:8080", "second")
            .unwrap());
        let table = builder.build();

        assert_eq!(table.len(), 1);
        assert_eq!(table.routes()[0].name(), "first");
    }

    #[test]
    fn test_register_rejects_empty_prefix() {
        let mut builder = RouteTable::builder();
        assert_eq!(
            builder.register_route("", "http://a:1", "a"),
            Err(RouteError::EmptyPrefix)
        );
    }

    #[test]
    fn test_register_rejects_relative_prefix() {
        let mut builder = RouteTable::builder();
        assert_eq!(
            builder.register_route("api", "http://a:1", "a"),
            Err(RouteError::RelativePrefix("api".to_string()))
        );
    }

    #[test]
    fn test_register_rejects_root_prefix() {
        let mut builder = RouteTable::builder();
        assert_eq!(
            builder.register_route("/", "http://a:1", "a"),
            Err(RouteError::RootPrefix)
        );
    }

    #[test]
    fn test_register_rejects_empty_target() {
        let mut builder = RouteTable::builder();
        assert_eq!(
            builder.register_route("/api", "  ", "API"),
            Err(RouteError::EmptyTarget {
                prefix: "/api".to_string()
            })
        );
    }

    #[test]
    fn test_blank_name_falls_back_to_prefix() {
        let mut builder = RouteTable::builder();
        builder
            .register_route("/dashboard", "http://localhost:5176", "")
            .unwrap();
        assert_eq!(builder.build().routes()[0].name(), "dashboard");
    }

    #[test]
    fn test_upstreams_are_deduplicated() {
        let mut builder = RouteTable::builder();
        builder
            .register_route("/studio", "http://localhost:5173", "Studio")
            .unwrap();
        builder
            .register_route("/dashboard", "http://localhost:5173/dash", "Dashboard")
            .unwrap();
        builder
            .register_route("/api", "http://localhost:8080", "API")
            .unwrap();
        let upstreams = builder.build().upstreams();

        assert_eq!(upstreams.len(), 2);
        assert_eq!(upstreams[0].address(), "localhost:5173");
        assert_eq!(upstreams[1].address(), "localhost:8080");
    }

    #[test]
    fn test_route_table_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RouteTable>();
    }
}
