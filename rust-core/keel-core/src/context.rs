//! # Web Context
//!
//! Per-dispatch handle on "the current request" for code that has no
//! request parameter. It lives in tokio task-local storage: set when a
//! dispatch starts, gone when that dispatch's future completes, and never
//! visible to another task.

use crate::connection::Connection;
use crate::request::Request;
use crate::router::Method;
use hyper::header::HeaderMap;
use std::future::Future;
use std::net::SocketAddr;

tokio::task_local! {
    static CURRENT: WebContext;
}

/// Snapshot of the request being dispatched
#[derive(Debug, Clone)]
pub struct WebContext {
    method: Method,
    uri: String,
    protocol: String,
    headers: HeaderMap,
    connection: Connection,
}

impl WebContext {
    /// Capture the head of `request`
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method(),
            uri: request.uri().to_string(),
            protocol: request.protocol(),
            headers: request.headers().clone(),
            connection: request.connection().clone(),
        }
    }

    /// Run `fut` with `self` as the current context
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// Context of the dispatch running on this task, if any
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Borrow the current context without cloning it
    pub fn with<R>(f: impl FnOnce(&Self) -> R) -> Option<R> {
        CURRENT.try_with(f).ok()
    }

    /// Request method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request path
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Protocol version
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Request header
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Peer address, when known
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.remote_addr()
    }

    /// Connection the request arrived on
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_context_outside_scope() {
        assert!(WebContext::current().is_none());
    }

    #[tokio::test]
    async fn test_scope_sets_and_clears() {
        let request = Request::new(Method::Post, "/orders?x=1").with_header("X-Trace", "t1");
        let ctx = WebContext::from_request(&request);

        let seen = ctx
            .scope(async {
                WebContext::with(|c| {
                    (c.method(), c.uri().to_string(), c.header("x-trace").map(String::from))
                })
            })
            .await;
        assert_eq!(
            seen,
            Some((Method::Post, "/orders".to_string(), Some("t1".to_string())))
        );
        assert!(WebContext::current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scopes_are_isolated() {
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                tokio::spawn(async move {
                    let uri = format!("/item/{i}");
                    let ctx = WebContext::from_request(&Request::new(Method::Get, &uri));
                    ctx.scope(async move {
                        tokio::task::yield_now().await;
                        WebContext::current().map(|c| c.uri().to_string()) == Some(uri)
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
    }
}
