//! # Error Handling
//!
//! Centralized error types for the keel dispatch core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Every pipeline stage returns [`Result`] and propagates with `?`; the
//! dispatcher owns the only error boundary.

use std::backtrace::Backtrace;
use std::fmt::Write as _;
use thiserror::Error;

/// Result type alias for keel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the keel runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A declared action parameter could not be produced from the request
    #[error("Cannot bind parameter '{name}' as {target}: {reason}")]
    Binding {
        /// Declared parameter name
        name: String,
        /// Target type the raw value had to be converted into
        target: String,
        /// What went wrong
        reason: String,
    },

    /// Fault raised by an action, raw handler or hook
    #[error("{message}")]
    Handler {
        /// Concrete type name of the original error
        type_name: String,
        /// Display form of the original error
        message: String,
        /// Source chain and backtrace captured at conversion time
        trace: String,
    },

    /// A pipeline stage panicked
    #[error("panicked: {message}")]
    Panic {
        /// Panic payload, when it was a string
        message: String,
        /// Panic location and backtrace of the panicking thread
        trace: String,
    },

    /// Write attempted on a response that was already flushed
    #[error("Response already committed")]
    ResponseCommitted,

    /// Container has no bean registered for the requested type
    #[error("No bean registered for {type_name}")]
    BeanNotFound {
        /// Requested type
        type_name: String,
    },

    /// Cached route target is not of the type the action expects
    #[error("Route target is not a {expected}")]
    TargetMismatch {
        /// Type the action was registered for
        expected: String,
    },

    /// Template could not be rendered
    #[error("Cannot render view '{view}': {reason}")]
    Template {
        /// View name
        view: String,
        /// Reason reported by the engine
        reason: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// JSON text could not be parsed
    #[error("JSON parse error: {reason}")]
    JsonParse {
        /// Parser message
        reason: String,
    },

    /// Underlying connection is no longer active
    #[error("Connection closed")]
    ConnectionClosed,

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an arbitrary error raised inside user code.
    ///
    /// Keeps the concrete type name and renders the `source()` chain plus a
    /// backtrace, so the error page can show where the fault came from.
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut trace = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(trace, "Caused by: {cause}");
            source = cause.source();
        }
        let _ = write!(trace, "{}", Backtrace::force_capture());

        Self::Handler {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            trace,
        }
    }

    /// Build a handler fault from a plain message
    pub fn message(message: impl Into<String>) -> Self {
        Self::Handler {
            type_name: "keel_core::error::Error".to_string(),
            message: message.into(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Build a binding error for the named parameter
    pub fn binding(
        name: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Binding {
            name: name.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Type name shown on error pages
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Handler { type_name, .. } => type_name.clone(),
            Self::Binding { .. } => "keel_core::error::Error::Binding".to_string(),
            Self::Panic { .. } => "panic".to_string(),
            other => format!("keel_core::error::Error::{}", other.variant_name()),
        }
    }

    /// Formatted trace shown on error pages
    #[must_use]
    pub fn trace(&self) -> String {
        match self {
            Self::Handler { trace, .. } | Self::Panic { trace, .. } => trace.clone(),
            other => {
                let mut trace = String::new();
                let mut source = std::error::Error::source(other);
                while let Some(cause) = source {
                    let _ = writeln!(trace, "Caused by: {cause}");
                    source = cause.source();
                }
                trace
            }
        }
    }

    const fn variant_name(&self) -> &'static str {
        match self {
            Self::BindError { .. } => "BindError",
            Self::InvalidRoutePattern { .. } => "InvalidRoutePattern",
            Self::Binding { .. } => "Binding",
            Self::Handler { .. } => "Handler",
            Self::Panic { .. } => "Panic",
            Self::ResponseCommitted => "ResponseCommitted",
            Self::BeanNotFound { .. } => "BeanNotFound",
            Self::TargetMismatch { .. } => "TargetMismatch",
            Self::Template { .. } => "Template",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::JsonParse { .. } => "JsonParse",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Http(_) => "Http",
            Self::Json(_) => "Json",
            Self::Io(_) => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_binding_error_names_parameter_and_type() {
        let err = Error::binding("id", "int", "invalid digit");
        let text = err.to_string();
        assert!(text.contains("'id'"));
        assert!(text.contains("int"));
    }

    #[test]
    fn test_handler_error_keeps_type_and_chain() {
        let err = Error::handler(DiskError {
            source: std::io::Error::new(std::io::ErrorKind::Other, "sector 7"),
        });
        assert!(err.type_name().ends_with("DiskError"));
        assert_eq!(err.to_string(), "disk on fire");
        assert!(err.trace().contains("Caused by: sector 7"));
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
        assert!(err.trace().contains("address in use"));
        assert_eq!(err.type_name(), "keel_core::error::Error::BindError");
    }
}
