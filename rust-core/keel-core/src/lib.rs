//! # Keel Core
//!
//! Per-request dispatch engine for the keel HTTP server.
//! Decides whether a request is static or routed, binds action arguments,
//! runs middleware and hooks around the handler, and guarantees exactly one
//! finished response per request, on errors and unmatched routes included.
//!
//! ## Architecture
//!
//! The transport parses a request and calls [`Dispatcher::dispatch`]. The
//! dispatcher owns the per-request [`Invoker`] and passes it through every
//! stage; the routing table, hook lists and collaborators are shared and
//! read-only while requests run.
//!
//! ## Modules
//!
//! - `dispatcher` - Pipeline state machine and error boundary
//! - `router` - Route table using matchit (radix trie), hook lookup
//! - `route` - Route metadata and lazily built controller
//! - `binder` - Action argument binding
//! - `handler` - Raw handlers, actions and their invocation
//! - `middleware` - Middleware and before/after hooks
//! - `view` - Reply writing and templates
//! - `statics` - Static file collaborator
//! - `context` - Task-local current request
//! - `container` - Bean container
//! - `request` / `response` / `connection` - HTTP types
//! - `server` - Hyper transport adapter
//! - `config` - Dispatcher settings
//! - `json` - JSON input parsing with simd-json
//! - `types` - Path parameter types and conversion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod binder;
pub mod config;
pub mod connection;
pub mod container;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod json;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod statics;
pub mod types;
pub mod ui;
pub mod view;

pub use binder::{ArgumentBinder, Args, BoundArg, Param};
pub use config::DispatchConfig;
pub use connection::{Connection, TrackedIo};
pub use container::Container;
pub use context::WebContext;
pub use dispatcher::{Dispatcher, Invoker};
pub use error::{Error, Result};
pub use handler::{raw, Action, BoxFuture, HandlerInvoker, RawHandler};
pub use json::{parse_body, parse_json};
pub use middleware::{HookEntry, HookRunner, Phase, WebHook};
pub use request::Request;
pub use response::Response;
pub use route::{Route, RouteTarget};
pub use router::{Method, Router};
pub use server::{init_tracing, Server, ServerConfig};
pub use statics::{DirStaticFiles, StaticFiles};
pub use types::{ParamType, ParamValue};
pub use view::{DefaultViewResolver, MemoryTemplates, Reply, TemplateEngine, ViewResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
