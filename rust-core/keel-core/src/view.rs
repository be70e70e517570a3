//! # View Resolution
//!
//! Turns what an action returned into a response body, runs higher-level
//! hooks, and renders named pages through a [`TemplateEngine`].

use crate::dispatcher::Invoker;
use crate::error::{Error, Result};
use crate::middleware::{Phase, WebHook};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Value returned by an action
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing to write; the response is finalized empty unless the action
    /// wrote it directly
    Empty,
    /// `text/plain` body
    Text(String),
    /// `text/html` body
    Html(String),
    /// JSON body
    Json(Value),
    /// Named view rendered with the request attributes
    View(String),
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for Reply {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

/// Writes action results and runs hooks on behalf of the dispatcher
pub trait ViewResolver: Send + Sync {
    /// Write `reply` into the invoker's response.
    ///
    /// Returns whether after-hook processing should continue.
    ///
    /// # Errors
    ///
    /// Serialization, rendering or write-after-commit failures.
    fn handle(&self, invoker: &mut Invoker, reply: Reply) -> Result<bool>;

    /// Run one side of a [`WebHook`]
    ///
    /// # Errors
    ///
    /// Whatever the hook returns.
    fn invoke_hook(&self, hook: &dyn WebHook, phase: Phase, invoker: &mut Invoker) -> Result<bool>;

    /// Render the named view into the response as HTML
    ///
    /// # Errors
    ///
    /// Rendering or write-after-commit failures.
    fn render(&self, view: &str, invoker: &mut Invoker) -> Result<()>;
}

/// Renders named templates
pub trait TemplateEngine: Send + Sync {
    /// Render `view` with the given attributes
    ///
    /// # Errors
    ///
    /// Returns `Error::Template` when the view is unknown or fails.
    fn render(&self, view: &str, attributes: &HashMap<String, Value>) -> Result<String>;
}

/// Resolver used unless the application installs its own
pub struct DefaultViewResolver {
    engine: Arc<dyn TemplateEngine>,
}

impl DefaultViewResolver {
    /// Resolver rendering views with `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self { engine }
    }
}

impl Default for DefaultViewResolver {
    fn default() -> Self {
        Self::new(Arc::new(MemoryTemplates::new()))
    }
}

impl ViewResolver for DefaultViewResolver {
    fn handle(&self, invoker: &mut Invoker, reply: Reply) -> Result<bool> {
        match reply {
            Reply::Empty => {}
            Reply::Text(text) => invoker.response_mut().text(text)?,
            Reply::Html(html) => invoker.response_mut().html(html)?,
            Reply::Json(value) => invoker.response_mut().json(&value)?,
            Reply::View(view) => self.render(&view, invoker)?,
        }
        Ok(true)
    }

    fn invoke_hook(&self, hook: &dyn WebHook, phase: Phase, invoker: &mut Invoker) -> Result<bool> {
        match phase {
            Phase::Before => hook.before(invoker),
            Phase::After => hook.after(invoker),
        }
    }

    fn render(&self, view: &str, invoker: &mut Invoker) -> Result<()> {
        let html = self.engine.render(view, invoker.request().attributes())?;
        invoker.response_mut().html(html)
    }
}

/// In-memory templates with `${name}` placeholders
///
/// String attributes are substituted as-is, other values as JSON. Unknown
/// placeholders render empty.
#[derive(Debug, Default, Clone)]
pub struct MemoryTemplates {
    templates: HashMap<String, String>,
}

impl MemoryTemplates {
    /// Empty template set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(name.into(), template.into());
        self
    }
}

impl TemplateEngine for MemoryTemplates {
    fn render(&self, view: &str, attributes: &HashMap<String, Value>) -> Result<String> {
        let template = self.templates.get(view).ok_or_else(|| Error::Template {
            view: view.to_string(),
            reason: "no such template".to_string(),
        })?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(Error::Template {
                    view: view.to_string(),
                    reason: "unclosed placeholder".to_string(),
                });
            };
            match attributes.get(&after[..end]) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => {}
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::router::Method;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_memory_templates_substitute() {
        let engine = MemoryTemplates::new().with("hi", "Hi ${name}, you are ${age}.${missing}");
        let out = engine
            .render("hi", &attrs(&[("name", json!("ada")), ("age", json!(36))]))
            .unwrap();
        assert_eq!(out, "Hi ada, you are 36.");
    }

    #[test]
    fn test_memory_templates_errors() {
        let engine = MemoryTemplates::new().with("bad", "oops ${name");
        assert!(matches!(
            engine.render("bad", &HashMap::new()),
            Err(Error::Template { .. })
        ));
        assert!(matches!(
            engine.render("absent", &HashMap::new()),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_replies_are_written() {
        let views = DefaultViewResolver::default();

        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        assert!(views.handle(&mut invoker, Reply::Json(json!({"id": 1}))).unwrap());
        assert_eq!(invoker.response().content_type(), "application/json");
        assert_eq!(invoker.response().body_text(), r#"{"id":1}"#);

        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        views.handle(&mut invoker, Reply::Empty).unwrap();
        assert!(!invoker.response().is_committed());
    }

    #[test]
    fn test_view_reply_uses_request_attributes() {
        let engine = MemoryTemplates::new().with("user", "<b>${user}</b>");
        let views = DefaultViewResolver::new(Arc::new(engine));
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        invoker.request_mut().set_attribute("user", "grace");

        views.handle(&mut invoker, Reply::View("user".into())).unwrap();
        assert_eq!(invoker.response().body_text(), "<b>grace</b>");
        assert!(invoker.response().content_type().starts_with("text/html"));
    }

    #[test]
    fn test_reply_after_direct_write_fails() {
        let views = DefaultViewResolver::default();
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        invoker.response_mut().text("direct").unwrap();
        assert!(matches!(
            views.handle(&mut invoker, "late".into()),
            Err(Error::ResponseCommitted)
        ));
    }
}
