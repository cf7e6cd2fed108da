//! Prefix matching for incoming HTTP requests.
//!
//! Picks the route whose prefix is the longest match for the request path,
//! respecting segment boundaries, and computes the path the upstream sees.

use std::sync::Arc;

use crate::store::{Route, RouteTable};

/// Result of resolving a request path against the route table.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Path and query to send upstream, e.g. `/foo?x=1` for `/studio/foo?x=1`.
    pub upstream_path: String,
}

/// Routes incoming request paths to upstream targets.
///
/// Holds a shared reference to the immutable route table, so it is cheap to
/// clone and safe to use from every worker thread.
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<RouteTable>,
}

impl Router {
    /// Creates a new Router over the given route table.
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Finds the route for a path.
    ///
    /// The longest matching prefix wins. Prefixes are unique, so on equal
    /// length the earlier registration is kept.
    pub fn find_route(&self, path: &str) -> Option<&Arc<Route>> {
        let mut best: Option<&Arc<Route>> = None;

        for route in self.table.routes() {
            if !Self::prefix_matches(route.prefix(), path) {
                continue;
            }
            let is_better = match best {
                None => true,
                Some(current) => route.prefix().len() > current.prefix().len(),
            };
            if is_better {
                best = Some(route);
            }
        }

        best
    }

    /// Resolves a request path (and optional query) to a route and the
    /// rewritten upstream path.
    ///
    /// Returns `None` if no route matches.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<RouteMatch> {
        let route = self.find_route(path)?;
        let upstream_path =
            Self::rewrite_path(route.prefix(), route.target().base_path(), path, query);

        Some(RouteMatch {
            route: Arc::clone(route),
            upstream_path,
        })
    }

    /// Prefix matching respecting segment boundaries.
    /// /api matches /api, /api/, /api/users
    /// /api does NOT match /apikeys (no segment boundary)
    fn prefix_matches(prefix: &str, path: &str) -> bool {
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Strips the route prefix and prepends the upstream base path.
    ///
    /// An empty remainder becomes `/`. The query string is carried over as is.
    pub fn rewrite_path(prefix: &str, base_path: &str, path: &str, query: Option<&str>) -> String {
        let rest = path.strip_prefix(prefix).unwrap_or(path);
        let rest = if rest.is_empty() { "/" } else { rest };

        let mut rewritten = String::with_capacity(base_path.len() + rest.len() + 1);
        rewritten.push_str(base_path);
        rewritten.push_str(rest);

        if let Some(q) = query {
            rewritten.push('?');
            rewritten.push_str(q);
        }
        rewritten
    }
}
