//! # Middleware and Hooks
//!
//! Cross-cutting handlers that run around the matched route:
//!
//! - global middleware, then path-scoped before-hooks, all ahead of the
//!   handler; the first rejection skips the rest of the chain and the
//!   handler, and the response is finalized as it stands;
//! - path-scoped after-hooks once the handler succeeded; a rejection stops
//!   later after-hooks but leaves the written response alone.
//!
//! An entry is either a raw request/response handler or a [`WebHook`], which
//! is invoked through the view resolver.

use crate::dispatcher::Invoker;
use crate::error::{Error, Result};
use crate::handler::RawHandler;
use crate::route::PathPattern;
use crate::view::ViewResolver;
use matchit::Router as MatchitRouter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook with access to the whole invocation
///
/// Returning `Ok(false)` rejects the request (before) or stops the
/// remaining after-hooks (after).
pub trait WebHook: Send + Sync {
    /// Called before the handler
    ///
    /// # Errors
    ///
    /// Any error aborts the dispatch into the error page.
    fn before(&self, _invoker: &mut Invoker) -> Result<bool> {
        Ok(true)
    }

    /// Called after the handler
    ///
    /// # Errors
    ///
    /// Any error aborts the dispatch into the error page.
    fn after(&self, _invoker: &mut Invoker) -> Result<bool> {
        Ok(true)
    }

    /// Hook name for logging
    fn name(&self) -> &'static str {
        "WebHook"
    }
}

/// Which side of the handler a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Middleware and before-hooks
    Before,
    /// After-hooks
    After,
}

/// One middleware or hook registration
#[derive(Clone)]
pub enum HookEntry {
    /// Raw handler; runs for its side effects and never rejects
    Handler(RawHandler),
    /// Hook invoked through the view resolver
    Hook(Arc<dyn WebHook>),
}

impl HookEntry {
    /// Wrap a [`WebHook`]
    pub fn hook<H: WebHook + 'static>(hook: H) -> Self {
        Self::Hook(Arc::new(hook))
    }
}

impl From<RawHandler> for HookEntry {
    fn from(handler: RawHandler) -> Self {
        Self::Handler(handler)
    }
}

impl From<Arc<dyn WebHook>> for HookEntry {
    fn from(hook: Arc<dyn WebHook>) -> Self {
        Self::Hook(hook)
    }
}

impl std::fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Hook(hook) => write!(f, "Hook({})", hook.name()),
        }
    }
}

/// Hook entry bound to a path pattern
pub struct HookRoute {
    pattern: PathPattern,
    matcher: MatchitRouter<()>,
    entry: HookEntry,
}

impl HookRoute {
    /// Bind `entry` to `pattern`.
    ///
    /// A trailing `*` also matches the path it hangs off, so `/admin/*`
    /// covers `/admin` as well as everything below it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if matchit rejects the pattern.
    pub fn new(pattern: &str, entry: HookEntry) -> Result<Self> {
        let parsed = PathPattern::parse(pattern);
        let mut matcher = MatchitRouter::new();
        let invalid = |e: matchit::InsertError| Error::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        matcher.insert(parsed.match_pattern.clone(), ()).map_err(invalid)?;
        if let Some(base) = parsed.catch_all_base() {
            matcher.insert(base, ()).map_err(invalid)?;
        }

        Ok(Self {
            pattern: parsed,
            matcher,
            entry,
        })
    }

    /// Whether the hook applies to `path`
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.at(path).is_ok()
    }

    /// Registered pattern
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern.path_pattern
    }

    /// The hook entry
    #[must_use]
    pub const fn entry(&self) -> &HookEntry {
        &self.entry
    }
}

/// Executes ordered hook lists
pub struct HookRunner<'d> {
    views: &'d dyn ViewResolver,
}

impl<'d> HookRunner<'d> {
    /// Create a runner dispatching hook entries through `views`
    #[must_use]
    pub fn new(views: &'d dyn ViewResolver) -> Self {
        Self { views }
    }

    /// Run middleware or before-hooks in order.
    ///
    /// Returns `false` as soon as one entry rejects; the remaining entries
    /// are not run.
    ///
    /// # Errors
    ///
    /// The first error raised by an entry, unchanged.
    pub async fn run_before(&self, hooks: &[&HookEntry], invoker: &mut Invoker) -> Result<bool> {
        self.run(hooks, Phase::Before, invoker).await
    }

    /// Run after-hooks in order, stopping at the first rejection.
    ///
    /// Whatever the handler already wrote stays in place.
    ///
    /// # Errors
    ///
    /// The first error raised by an entry, unchanged.
    pub async fn run_after(&self, hooks: &[&HookEntry], invoker: &mut Invoker) -> Result<bool> {
        self.run(hooks, Phase::After, invoker).await
    }

    async fn run(&self, hooks: &[&HookEntry], phase: Phase, invoker: &mut Invoker) -> Result<bool> {
        for entry in hooks {
            match entry {
                HookEntry::Handler(handler) => {
                    let (request, response) = invoker.parts_mut();
                    handler(request, response).await?;
                }
                HookEntry::Hook(hook) => {
                    if !self.views.invoke_hook(hook.as_ref(), phase, invoker)? {
                        match phase {
                            Phase::Before => warn!(
                                hook = hook.name(),
                                uri = invoker.request().uri(),
                                status = invoker.response().status(),
                                "Request rejected by hook"
                            ),
                            Phase::After => debug!(
                                hook = hook.name(),
                                uri = invoker.request().uri(),
                                "After-hook chain stopped"
                            ),
                        }
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::raw;
    use crate::request::Request;
    use crate::router::Method;
    use crate::view::{DefaultViewResolver, MemoryTemplates};
    use std::sync::Mutex;

    /// Records its label on both phases and answers with `verdict`
    struct Recorder {
        label: &'static str,
        verdict: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl WebHook for Recorder {
        fn before(&self, _invoker: &mut Invoker) -> Result<bool> {
            self.log.lock().unwrap().push(format!("before:{}", self.label));
            Ok(self.verdict)
        }

        fn after(&self, _invoker: &mut Invoker) -> Result<bool> {
            self.log.lock().unwrap().push(format!("after:{}", self.label));
            Ok(self.verdict)
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    struct Failing;

    impl WebHook for Failing {
        fn before(&self, _invoker: &mut Invoker) -> Result<bool> {
            Err(Error::message("hook exploded"))
        }
    }

    fn recorder(label: &'static str, verdict: bool, log: &Arc<Mutex<Vec<String>>>) -> HookEntry {
        HookEntry::hook(Recorder { label, verdict, log: log.clone() })
    }

    fn views() -> DefaultViewResolver {
        DefaultViewResolver::new(Arc::new(MemoryTemplates::new()))
    }

    #[tokio::test]
    async fn test_before_chain_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", true, &log);
        let b = recorder("b", false, &log);
        let c = recorder("c", true, &log);
        let views = views();
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));

        let proceed = HookRunner::new(&views)
            .run_before(&[&a, &b, &c], &mut invoker)
            .await
            .unwrap();
        assert!(!proceed);
        assert_eq!(*log.lock().unwrap(), vec!["before:a", "before:b"]);
    }

    #[tokio::test]
    async fn test_after_chain_keeps_body() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", false, &log);
        let b = recorder("b", true, &log);
        let views = views();
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        invoker.response_mut().text("done").unwrap();

        let proceed = HookRunner::new(&views)
            .run_after(&[&a, &b], &mut invoker)
            .await
            .unwrap();
        assert!(!proceed);
        assert_eq!(*log.lock().unwrap(), vec!["after:a"]);
        assert_eq!(invoker.response().body_text(), "done");
    }

    #[tokio::test]
    async fn test_raw_entries_run_and_continue() {
        let stamp = HookEntry::from(raw(|req, res| {
            Box::pin(async move {
                req.set_attribute("stamped", true);
                res.set_header("X-Stamp", "1");
                Ok(())
            })
        }));
        let views = views();
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));

        let proceed = HookRunner::new(&views)
            .run_before(&[&stamp], &mut invoker)
            .await
            .unwrap();
        assert!(proceed);
        assert_eq!(invoker.response().header("x-stamp"), Some("1"));
        assert!(invoker.request().attribute("stamped").is_some());
    }

    #[tokio::test]
    async fn test_hook_errors_propagate() {
        let failing = HookEntry::hook(Failing);
        let views = views();
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));

        let err = HookRunner::new(&views)
            .run_before(&[&failing], &mut invoker)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "hook exploded");
    }

    #[test]
    fn test_hook_route_patterns() {
        let entry = || HookEntry::hook(Failing);
        let all = HookRoute::new("/*", entry()).unwrap();
        assert!(all.matches("/"));
        assert!(all.matches("/a/b"));

        let admin = HookRoute::new("/admin/*", entry()).unwrap();
        assert!(admin.matches("/admin"));
        assert!(admin.matches("/admin/users/1"));
        assert!(!admin.matches("/administrator"));
        assert_eq!(admin.pattern(), "/admin/*");

        let user = HookRoute::new("/users/:id", entry()).unwrap();
        assert!(user.matches("/users/9"));
        assert!(!user.matches("/users/9/posts"));
    }
}
