//! # Dispatch Configuration
//!
//! Inputs the dispatcher reads on every request: which paths are static,
//! where static files live, and the optional custom 404/500 views.

use crate::error::Result;
use crate::json::parse_json;
use serde::Deserialize;
use std::path::PathBuf;

/// Dispatcher settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Static prefixes and exact static paths
    pub statics: Vec<String>,
    /// View rendered for unmatched routes
    pub page_404: Option<String>,
    /// View rendered when dispatch fails
    pub page_500: Option<String>,
    /// Directory the built-in static collaborator serves from
    pub static_root: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            statics: vec![
                "/favicon.ico".to_string(),
                "/static/".to_string(),
                "/upload/".to_string(),
            ],
            page_404: None,
            page_500: None,
            static_root: PathBuf::from("public"),
        }
    }
}

impl DispatchConfig {
    /// Defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::JsonParse` for malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        parse_json(json)
    }

    /// Add a static prefix or path
    #[must_use]
    pub fn with_static(mut self, entry: impl Into<String>) -> Self {
        self.statics.push(entry.into());
        self
    }

    /// Set the 404 view
    #[must_use]
    pub fn with_page_404(mut self, view: impl Into<String>) -> Self {
        self.page_404 = Some(view.into());
        self
    }

    /// Set the 500 view
    #[must_use]
    pub fn with_page_500(mut self, view: impl Into<String>) -> Self {
        self.page_500 = Some(view.into());
        self
    }

    /// Set the static file root
    #[must_use]
    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    /// Whether `uri` equals or starts with a static entry
    #[must_use]
    pub fn is_static(&self, uri: &str) -> bool {
        self.statics.iter().any(|entry| uri.starts_with(entry.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_statics() {
        let config = DispatchConfig::default();
        assert!(config.is_static("/favicon.ico"));
        assert!(config.is_static("/static/app.css"));
        assert!(config.is_static("/upload/a/b.png"));
        assert!(!config.is_static("/static"));
        assert!(!config.is_static("/users/1"));
        assert!(config.page_404.is_none());
    }

    #[test]
    fn test_added_entries() {
        let config = DispatchConfig::new().with_static("/robots.txt").with_static("/assets");
        assert!(config.is_static("/robots.txt"));
        assert!(config.is_static("/assets/x.js"));
        assert!(!config.is_static("/asset"));
    }

    #[test]
    fn test_from_json_keeps_defaults() {
        let config =
            DispatchConfig::from_json(r#"{"page_404": "missing", "static_root": "www"}"#).unwrap();
        assert_eq!(config.page_404.as_deref(), Some("missing"));
        assert_eq!(config.static_root, PathBuf::from("www"));
        assert_eq!(config.statics.len(), 3);
        assert!(config.page_500.is_none());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(DispatchConfig::from_json("{not json").is_err());
    }
}
