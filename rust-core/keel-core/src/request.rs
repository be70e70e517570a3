//! # HTTP Request
//!
//! Fully parsed request handed to the dispatcher by the transport.
//!
//! Method, URI, headers and body are fixed for the lifetime of a dispatch;
//! path parameters and named attributes are filled in as the pipeline runs.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::router::Method;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Version;
use serde_json::Value;
use std::collections::HashMap;

/// HTTP request as seen by the dispatch pipeline
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: Option<String>,
    query_params: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
    version: Version,
    path_params: HashMap<String, String>,
    attributes: HashMap<String, Value>,
    connection: Connection,
}

impl Request {
    /// Create a request manually (for tests and in-process dispatch)
    ///
    /// `uri` may carry a query string.
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri.to_string(), None),
        };
        let query_params = parse_query_string(query_string.as_deref());

        Self {
            method,
            path,
            query_string,
            query_params,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            version: Version::HTTP_11,
            path_params: HashMap::new(),
            attributes: HashMap::new(),
            connection: Connection::detached(),
        }
    }

    /// Set the request body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Bind the request to a connection
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = connection;
        self
    }

    /// Create from a hyper request, rejecting bodies over `max_body_size`
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` for an oversized body and `Error::Http`
    /// when the body stream fails.
    pub async fn from_hyper(
        req: hyper::Request<hyper::body::Incoming>,
        connection: Connection,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::from(req.method());
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query_params = parse_query_string(query_string.as_deref());
        let headers = req.headers().clone();
        let version = req.version();

        let declared = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(content_len) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: content_len,
            });
        }

        let body = BodyExt::collect(req.into_body()).await?.to_bytes();
        if body.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: body.len(),
            });
        }

        Ok(Self {
            method,
            path,
            query_string,
            query_params,
            headers,
            body,
            version,
            path_params: HashMap::new(),
            attributes: HashMap::new(),
            connection,
        })
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request path (without query string)
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.path
    }

    /// Protocol version, e.g. `HTTP/1.1`
    #[must_use]
    pub fn protocol(&self) -> String {
        format!("{:?}", self.version)
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// All headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Single query parameter
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Get query parameters as a `HashMap`
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Raw request body
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Request body as UTF-8, if it is valid UTF-8
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Store the path parameters extracted by the router
    pub fn init_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    /// Raw path parameter
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// All raw path parameters
    #[must_use]
    pub const fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Set a named, request-scoped attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Request-scoped attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All request-scoped attributes
    #[must_use]
    pub const fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Connection this request arrived on
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Parse query string into `HashMap`
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_query() {
        let req = Request::new(Method::Get, "/search?q=rust+lang&page=2");
        assert_eq!(req.uri(), "/search");
        assert_eq!(req.query("q"), Some("rust lang"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2"));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
        assert!(parse_query_string(Some("")).is_empty());
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("New%20York"), "New York");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("50%"), "50%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn test_attributes_and_headers() {
        let mut req = Request::new(Method::Post, "/").with_header("X-Token", "abc");
        req.set_attribute("user", "ada");
        assert_eq!(req.header("x-token"), Some("abc"));
        assert_eq!(req.attribute("user"), Some(&Value::from("ada")));
        assert_eq!(req.protocol(), "HTTP/1.1");
    }
}
