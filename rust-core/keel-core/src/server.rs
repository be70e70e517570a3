//! # Transport
//!
//! Transport adapter built on Hyper and Tokio. Parses each request, hands it
//! to the [`Dispatcher`] and writes back whatever it produced.
//!
//! ## Behavior
//!
//! - HTTP/1.1 with keep-alive
//! - Per-connection liveness handle shared with every request, closed by
//!   the socket wrapper on EOF or IO error
//! - Body size limit answered with `413`
//! - Graceful shutdown on Ctrl-C with a drain timeout

use crate::connection::{Connection, TrackedIo};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::router::Method;
use http_body_util::Full;
pub use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default `127.0.0.1:8000`)
    pub address: SocketAddr,
    /// Keep HTTP/1.1 connections open between requests
    pub keep_alive: bool,
    /// How long open connections may drain after Ctrl-C
    pub shutdown_timeout: Duration,
    /// Largest accepted body; bigger ones get `413`
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Install the JSON log subscriber
///
/// `RUST_LOG` wins over the default `keel_core=info`. Calling it again is a
/// no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel_core=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

/// HTTP server around a frozen dispatcher
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Create a server for `dispatcher` with default settings
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Replace the server settings
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Listen on `addr` instead
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Change the body limit
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Server settings
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatcher requests are handed to
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept connections until Ctrl-C, then drain
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound and
    /// `Error::Io` if accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let bind_error = |source| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1024).map_err(bind_error)?;

        info!(%addr, "Listening");

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let connection = Connection::new(Some(remote_addr));
                    let io = TokioIo::new(TrackedIo::new(stream, connection.clone()));
                    let dispatcher = self.dispatcher.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        let service_connection = connection.clone();

                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let dispatcher = dispatcher.clone();
                            let connection = service_connection.clone();
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let version = req.version();

                                let result =
                                    handle_request(req, &dispatcher, connection, max_body_size).await;
                                match &result {
                                    Ok(resp) => info!(
                                        "    {} - \"{} {} {:?}\" {}",
                                        remote_addr,
                                        method,
                                        path,
                                        version,
                                        resp.status().as_u16()
                                    ),
                                    Err(e) => warn!(
                                        "    {} - \"{} {} {:?}\" {}",
                                        remote_addr,
                                        method,
                                        path,
                                        version,
                                        e
                                    ),
                                }
                                result
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            debug!(error = ?err, %remote_addr, "Connection ended with error");
                        }
                        connection.close();
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Ctrl-C received, draining connections");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with open connections"
            );
        }
        Ok(())
    }

    /// Dispatch a request built in memory, applying the same body limit
    pub async fn test_request(
        &self,
        method: Method,
        path: &str,
        headers: &HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        if let Some(b) = body.as_ref() {
            if b.len() > self.config.max_body_size {
                return payload_too_large();
            }
        }

        let mut request = Request::new(method, path);
        for (name, value) in headers {
            request.set_header(name, value);
        }
        if let Some(b) = body {
            request = request.with_body(b);
        }

        self.dispatcher.dispatch(request).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C; graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
}

fn payload_too_large() -> Response {
    let mut response = Response::new();
    response.set_status(StatusCode::PAYLOAD_TOO_LARGE.as_u16());
    // a fresh response cannot be committed yet
    let _ = response.text("Payload Too Large");
    response
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    dispatcher: &Dispatcher,
    connection: Connection,
    max_body_size: usize,
) -> Result<hyper::Response<Full<Bytes>>> {
    let request = match Request::from_hyper(req, connection, max_body_size).await {
        Ok(r) => r,
        Err(Error::PayloadTooLarge { limit, actual }) => {
            warn!(limit, actual, "Request body too large");
            return Ok(payload_too_large().into_hyper());
        }
        Err(e) => {
            warn!(error = %e, "Rejecting unparsable request");
            let mut response = Response::new();
            response.set_status(StatusCode::BAD_REQUEST.as_u16());
            let _ = response.text("Bad Request");
            return Ok(response.into_hyper());
        }
    };

    let response = dispatcher.dispatch(request).await;
    if response.is_abandoned() {
        return Err(Error::ConnectionClosed);
    }
    Ok(response.into_hyper())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::raw;
    use crate::router::Router;

    fn echo_server() -> Server {
        let mut router = Router::new();
        router
            .post(
                "/echo",
                raw(|req, res| {
                    let body = req.body().clone();
                    let token = req.header("x-token").unwrap_or("none").to_string();
                    Box::pin(async move {
                        res.set_header("X-Token", &token);
                        res.write(body)
                    })
                }),
            )
            .unwrap();
        Server::new(Dispatcher::new(router))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let server = echo_server();
        let headers = HashMap::from([("X-Token".to_string(), "t-1".to_string())]);
        let response = server
            .test_request(Method::Post, "/echo", &headers, Some(Bytes::from("ping")))
            .await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.body_text(), "ping");
        assert_eq!(response.header("x-token"), Some("t-1"));
    }

    #[tokio::test]
    async fn test_request_too_large() {
        let mut server = echo_server();
        server.set_max_body_size(4);
        let response = server
            .test_request(Method::Post, "/echo", &HashMap::new(), Some(Bytes::from("too long")))
            .await;
        assert_eq!(response.status(), 413);
    }

    #[tokio::test]
    async fn test_request_unknown_route() {
        let response = echo_server()
            .test_request(Method::Get, "/echo", &HashMap::new(), None)
            .await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_serve_reports_bind_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let server = echo_server().bind(addr);

        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, Error::BindError { .. }));
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
