//! # HTTP Response
//!
//! Mutable output builder with a single-use commit flag.
//!
//! Writing a body commits the response; afterwards every further body write
//! fails with [`Error::ResponseCommitted`] and status/header changes are
//! ignored. [`Response::finish`] is the idempotent close-out used on every
//! terminal branch of a dispatch.

use crate::error::{Error, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Response under construction for one dispatch
pub struct Response {
    status: u16,
    content_type: String,
    headers: HashMap<String, String>,
    body: Bytes,
    committed: bool,
    abandoned: bool,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("committed", &self.committed)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
            committed: false,
            abandoned: false,
        }
    }
}

impl Response {
    /// Fresh, uncommitted 200 response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status code
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Set status code; ignored once committed
    pub fn set_status(&mut self, status: u16) -> &mut Self {
        if self.committed {
            debug!(status, "status change after commit ignored");
        } else {
            self.status = status;
        }
        self
    }

    /// Shorthand for `set_status(404)`
    pub fn not_found(&mut self) -> &mut Self {
        self.set_status(404)
    }

    /// Content type that will be sent
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Set content type; ignored once committed
    pub fn set_content_type(&mut self, value: &str) -> &mut Self {
        if !self.committed {
            self.content_type = value.to_string();
        }
        self
    }

    /// Header value
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Set or override a header; ignored once committed
    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        if self.committed {
            debug!(header = key, "header change after commit ignored");
        } else if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Body written so far
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 (lossy)
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the response has been flushed
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the response was dropped because the connection closed
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Write the body and commit.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseCommitted` if a body was already sent.
    pub fn write(&mut self, body: impl Into<Bytes>) -> Result<()> {
        if self.committed {
            return Err(Error::ResponseCommitted);
        }
        self.body = body.into();
        self.committed = true;
        Ok(())
    }

    /// Write a plain text body and commit
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseCommitted` if a body was already sent.
    pub fn text(&mut self, text: impl Into<String>) -> Result<()> {
        self.set_content_type("text/plain; charset=utf-8");
        self.write(text.into())
    }

    /// Write an HTML body and commit
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseCommitted` if a body was already sent.
    pub fn html(&mut self, html: impl Into<String>) -> Result<()> {
        self.set_content_type("text/html; charset=utf-8");
        self.write(html.into())
    }

    /// Serialize `value` as the JSON body and commit
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails and
    /// `Error::ResponseCommitted` if a body was already sent.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.set_content_type("application/json");
        self.write(body)
    }

    /// Close out the response: commit an empty body unless already committed.
    ///
    /// Safe to call any number of times; only the first call on an
    /// uncommitted response has an effect.
    pub fn finish(&mut self) {
        if self.committed {
            return;
        }
        self.body = Bytes::new();
        self.committed = true;
    }

    /// Give up on the response; nothing will be sent
    pub fn abandon(&mut self) {
        self.abandoned = true;
        self.committed = true;
    }

    /// Convert to a hyper response
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("Content-Type", &self.content_type);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        match builder.body(Full::new(self.body)) {
            Ok(resp) => resp,
            Err(_) => {
                let mut fallback = hyper::Response::new(Full::new(Bytes::from_static(
                    b"Internal Server Error",
                )));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_uncommitted_200() {
        let resp = Response::new();
        assert_eq!(resp.status(), 200);
        assert!(!resp.is_committed());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_second_write_is_rejected() {
        let mut resp = Response::new();
        resp.text("first").unwrap();
        assert!(matches!(resp.html("second"), Err(Error::ResponseCommitted)));
        assert_eq!(resp.body_text(), "first");
        assert_eq!(resp.content_type(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_status_frozen_after_commit() {
        let mut resp = Response::new();
        resp.set_status(401).set_header("WWW-Authenticate", "Bearer");
        resp.finish();
        resp.set_status(500);
        assert_eq!(resp.status(), 401);
        assert_eq!(resp.header("www-authenticate"), Some("Bearer"));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut resp = Response::new();
        resp.json(&serde_json::json!({"ok": true})).unwrap();
        resp.finish();
        resp.finish();
        assert_eq!(resp.body_text(), r#"{"ok":true}"#);

        let mut empty = Response::new();
        empty.finish();
        assert!(empty.is_committed());
        assert!(empty.body().is_empty());
        empty.finish();
        assert!(empty.body().is_empty());
    }

    #[test]
    fn test_into_hyper() {
        let mut resp = Response::new();
        resp.set_status(201).set_header("X-Id", "7");
        resp.text("made").unwrap();
        let hyper_resp = resp.into_hyper();
        assert_eq!(hyper_resp.status(), StatusCode::CREATED);
        assert_eq!(hyper_resp.headers().get("x-id").unwrap(), "7");
    }
}
