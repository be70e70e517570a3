//! # Route Matcher
//!
//! Maps `(method, path)` to a registered [`Route`] and resolves the
//! middleware and before/after hooks that apply to a path.
//!
//! ## Matching policy
//!
//! - Exact paths (no parameters or wildcards) are kept in a hash map and
//!   always win.
//! - Every pattern route has its own `matchit` matcher. Pattern routes are
//!   kept ordered by their number of parameter and wildcard segments, so
//!   the first one that matches is the most specific.
//! - Routes with the same specificity keep registration order, and the
//!   earlier registration wins. The same goes for a repeated exact path.
//!
//! The table is built before serving starts and only read afterwards.

use crate::error::{Error, Result};
use crate::middleware::{HookEntry, HookRoute};
use crate::route::{Route, RouteTarget};
use matchit::Router as MatchitRouter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
    /// HTTP TRACE
    Trace,
    /// HTTP CONNECT
    Connect,
    /// Extension method; never routable
    Other,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
            Self::Trace => write!(f, "TRACE"),
            Self::Connect => write!(f, "CONNECT"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

impl From<&hyper::Method> for Method {
    fn from(method: &hyper::Method) -> Self {
        match *method {
            hyper::Method::GET => Self::Get,
            hyper::Method::POST => Self::Post,
            hyper::Method::PUT => Self::Put,
            hyper::Method::DELETE => Self::Delete,
            hyper::Method::PATCH => Self::Patch,
            hyper::Method::HEAD => Self::Head,
            hyper::Method::OPTIONS => Self::Options,
            hyper::Method::TRACE => Self::Trace,
            hyper::Method::CONNECT => Self::Connect,
            _ => Self::Other,
        }
    }
}

/// Matched route with the raw path parameters it extracted
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route
    pub route: Arc<Route>,
    /// Raw path parameters, keyed by name
    pub params: HashMap<String, String>,
}

/// Pattern route with the matcher for its one pattern
struct PatternRoute {
    route: Arc<Route>,
    matcher: MatchitRouter<()>,
}

impl PatternRoute {
    fn new(route: Arc<Route>) -> Result<Self> {
        let mut matcher = MatchitRouter::new();
        matcher
            .insert(route.pattern().match_pattern.clone(), ())
            .map_err(|e| Error::InvalidRoutePattern {
                pattern: route.pattern().path_pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { route, matcher })
    }

    fn specificity(&self) -> usize {
        self.route.pattern().dynamic_segments
    }
}

/// Per-method storage for routes
#[derive(Default)]
struct MethodRoutes {
    /// Routes without parameters, keyed by normalized path
    exact: HashMap<String, Arc<Route>>,
    /// Pattern routes by ascending dynamic segment count, then registration
    patterns: Vec<PatternRoute>,
}

/// Route table plus middleware and hook lists
#[derive(Default)]
pub struct Router {
    method_routes: HashMap<Method, MethodRoutes>,
    middleware: Vec<HookEntry>,
    before: Vec<HookRoute>,
    after: Vec<HookRoute>,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route with the given method and path pattern
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        target: impl Into<RouteTarget>,
    ) -> Result<Arc<Route>> {
        let route = Arc::new(Route::new(method, path, target));
        let pattern = route.pattern();
        let method_routes = self.method_routes.entry(method).or_default();

        if pattern.is_exact() {
            if method_routes.exact.contains_key(&pattern.match_pattern) {
                warn!(%method, path, "Path already registered; earlier route keeps it");
            }
            method_routes
                .exact
                .entry(pattern.match_pattern.clone())
                .or_insert_with(|| route.clone());
        } else {
            let entry = PatternRoute::new(route.clone())?;
            let specificity = entry.specificity();
            let at = method_routes
                .patterns
                .partition_point(|p| p.specificity() <= specificity);
            method_routes.patterns.insert(at, entry);
        }

        debug!(%method, path, "Route registered");
        Ok(route)
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn get(&mut self, path: &str, target: impl Into<RouteTarget>) -> Result<Arc<Route>> {
        self.add_route(Method::Get, path, target)
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn post(&mut self, path: &str, target: impl Into<RouteTarget>) -> Result<Arc<Route>> {
        self.add_route(Method::Post, path, target)
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn put(&mut self, path: &str, target: impl Into<RouteTarget>) -> Result<Arc<Route>> {
        self.add_route(Method::Put, path, target)
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// See [`Router::add_route`].
    pub fn delete(&mut self, path: &str, target: impl Into<RouteTarget>) -> Result<Arc<Route>> {
        self.add_route(Method::Delete, path, target)
    }

    /// Append a global middleware; runs for every routed request
    pub fn use_middleware(&mut self, entry: impl Into<HookEntry>) {
        self.middleware.push(entry.into());
    }

    /// Append a before-hook for paths matching `pattern`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed.
    pub fn before(&mut self, pattern: &str, entry: impl Into<HookEntry>) -> Result<()> {
        self.before.push(HookRoute::new(pattern, entry.into())?);
        Ok(())
    }

    /// Append an after-hook for paths matching `pattern`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed.
    pub fn after(&mut self, pattern: &str, entry: impl Into<HookEntry>) -> Result<()> {
        self.after.push(HookRoute::new(pattern, entry.into())?);
        Ok(())
    }

    /// Find the route for `method` and `uri`
    ///
    /// Pure read: the same input always yields the same route.
    #[must_use]
    pub fn lookup_route(&self, method: Method, uri: &str) -> Option<RouteMatch> {
        let method_routes = self.method_routes.get(&method)?;
        let path = normalize_path(uri);

        if let Some(route) = method_routes.exact.get(&*path) {
            return Some(RouteMatch {
                route: route.clone(),
                params: HashMap::new(),
            });
        }

        method_routes.patterns.iter().find_map(|candidate| {
            let matched = candidate.matcher.at(&path).ok()?;
            let params = matched
                .params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            Some(RouteMatch {
                route: candidate.route.clone(),
                params,
            })
        })
    }

    /// Global middleware, in registration order
    #[must_use]
    pub fn middleware(&self) -> Vec<&HookEntry> {
        self.middleware.iter().collect()
    }

    /// Before-hooks applying to `uri`, in registration order
    #[must_use]
    pub fn get_before(&self, uri: &str) -> Vec<&HookEntry> {
        let path = normalize_path(uri);
        self.before
            .iter()
            .filter(|hook| hook.matches(&path))
            .map(HookRoute::entry)
            .collect()
    }

    /// After-hooks applying to `uri`, in registration order
    #[must_use]
    pub fn get_after(&self, uri: &str) -> Vec<&HookEntry> {
        let path = normalize_path(uri);
        self.after
            .iter()
            .filter(|hook| hook.matches(&path))
            .map(HookRoute::entry)
            .collect()
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.method_routes
            .values()
            .map(|m| m.exact.len() + m.patterns.len())
            .sum()
    }

    /// Whether no route is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop a trailing slash so `/users/` finds `/users`
pub(crate) fn normalize_path(uri: &str) -> std::borrow::Cow<'_, str> {
    let trimmed = uri.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else if trimmed.starts_with('/') {
        trimmed.into()
    } else {
        format!("/{trimmed}").into()
    }
}
