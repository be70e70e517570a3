//! # Route Metadata
//!
//! A registered `{method, path pattern} -> target` binding plus the lazily
//! resolved controller instance shared by every dispatch of the route.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::handler::{Action, RawHandler, Target};
use crate::router::Method;
use crate::types::ParamType;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::debug;

/// What a route runs when it matches
pub enum RouteTarget {
    /// Raw request/response handler; writes the response itself
    Handler(RawHandler),
    /// Controller action; its return value goes through view resolution
    Action(Action),
}

impl std::fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Action(action) => write!(f, "Action({})", action.name()),
        }
    }
}

impl From<RawHandler> for RouteTarget {
    fn from(handler: RawHandler) -> Self {
        Self::Handler(handler)
    }
}

impl From<Action> for RouteTarget {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

/// Parsed form of a path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// Original path pattern (e.g., "/users/{id:int}" or "/users/:id")
    pub path_pattern: String,
    /// Normalized pattern in matchit syntax (e.g., "/users/{id}")
    pub match_pattern: String,
    /// Parameter name to declared type mapping
    pub param_types: HashMap<String, ParamType>,
    /// Number of parameter and wildcard segments
    pub dynamic_segments: usize,
}

impl PathPattern {
    /// Parse a route or hook pattern.
    ///
    /// Accepts `:name`, `{name}`, `{name:type}`, a trailing `*` and
    /// `{*rest}`. Empty segments are dropped, so `/users/` and `/users` are
    /// the same pattern.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut param_types = HashMap::new();
        let mut normalized_parts = Vec::new();
        let mut dynamic_segments = 0;

        for segment in path.split('/') {
            if segment.is_empty() {
                continue;
            }

            if segment == "*" {
                dynamic_segments += 1;
                normalized_parts.push("{*wildcard}".to_string());
            } else if segment.starts_with("{*") {
                dynamic_segments += 1;
                normalized_parts.push(segment.to_string());
            } else if let Some((name, param_type)) = crate::types::parse_param_pattern(segment) {
                dynamic_segments += 1;
                normalized_parts.push(format!("{{{name}}}"));
                param_types.insert(name, param_type);
            } else {
                normalized_parts.push(segment.to_string());
            }
        }

        let match_pattern = if normalized_parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", normalized_parts.join("/"))
        };

        Self {
            path_pattern: path.to_string(),
            match_pattern,
            param_types,
            dynamic_segments,
        }
    }

    /// Whether the pattern has no parameters or wildcards
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        self.dynamic_segments == 0
    }

    /// Pattern without its trailing catch-all, if it has one
    #[must_use]
    pub fn catch_all_base(&self) -> Option<String> {
        let (base, last) = self.match_pattern.rsplit_once('/')?;
        if last.starts_with("{*") {
            Some(if base.is_empty() { "/".to_string() } else { base.to_string() })
        } else {
            None
        }
    }

    /// Declared type of a path parameter (`String` when undeclared)
    #[must_use]
    pub fn get_param_type(&self, name: &str) -> ParamType {
        self.param_types.get(name).copied().unwrap_or_default()
    }
}

/// A registered route
///
/// Routes are created at registration time and shared read-only between
/// dispatches, except for the target instance which is resolved from the
/// container on first use and cached for the life of the server.
pub struct Route {
    method: Method,
    pattern: PathPattern,
    target: RouteTarget,
    instance: OnceLock<Target>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.path_pattern)
            .field("target", &self.target)
            .field("resolved", &self.instance.get().is_some())
            .finish()
    }
}

impl Route {
    /// Create a route for `method` and `path`
    #[must_use]
    pub fn new(method: Method, path: &str, target: impl Into<RouteTarget>) -> Self {
        Self {
            method,
            pattern: PathPattern::parse(path),
            target: target.into(),
            instance: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Parsed path pattern
    #[must_use]
    pub const fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Registered target
    #[must_use]
    pub const fn target(&self) -> &RouteTarget {
        &self.target
    }

    /// Controller instance, if it was already resolved
    #[must_use]
    pub fn cached_instance(&self) -> Option<&Target> {
        self.instance.get()
    }

    /// Resolve the controller instance for an action route.
    ///
    /// The container is consulted at most once per route, even when many
    /// dispatches race on the first access; later calls return the cached
    /// instance without locking. A failed lookup is not cached.
    ///
    /// # Errors
    ///
    /// Returns `Error::BeanNotFound` if the container has no bean for the
    /// action's controller type, or the factory's error.
    pub fn resolve_instance(&self, action: &Action, container: &Container) -> Result<Target> {
        if let Some(instance) = self.instance.get() {
            return Ok(instance.clone());
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = self.instance.get() {
            return Ok(instance.clone());
        }

        debug!(
            route = %self.pattern.path_pattern,
            controller = action.controller_name(),
            "Resolving route target"
        );
        let instance = container.resolve_bean(action.controller_type(), action.controller_name())?;
        self.instance
            .set(instance.clone())
            .map_err(|_| Error::message("route target initialised twice"))?;
        Ok(instance)
    }
}
