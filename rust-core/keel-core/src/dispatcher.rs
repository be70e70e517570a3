//! # Dispatcher
//!
//! Runs one request through the pipeline and always produces exactly one
//! finished response:
//!
//! ```text
//! static check -> route lookup -> (404 | bind -> middleware -> before
//!     -> invoke -> after) -> finish
//! ```
//!
//! Every stage returns [`Result`]; faults (panics included) land in a
//! single error boundary that writes the 500 page, unless the client has
//! already gone away, in which case the response is abandoned.

use crate::binder::{ArgumentBinder, BoundArg};
use crate::config::DispatchConfig;
use crate::container::Container;
use crate::context::WebContext;
use crate::error::{Error, Result};
use crate::handler::{Action, HandlerInvoker};
use crate::middleware::HookRunner;
use crate::request::Request;
use crate::response::Response;
use crate::route::{Route, RouteTarget};
use crate::router::Router;
use crate::statics::{DirStaticFiles, StaticFiles};
use crate::ui;
use crate::view::{DefaultViewResolver, ViewResolver};
use futures_util::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use tracing::{debug, error, warn};

/// Per-request state passed through every pipeline stage
#[derive(Debug)]
pub struct Invoker {
    request: Request,
    response: Response,
    route: Option<Arc<Route>>,
    parameters: Vec<BoundArg>,
}

impl Invoker {
    /// Start a dispatch for `request` with a fresh response
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: Response::new(),
            route: None,
            parameters: Vec::new(),
        }
    }

    /// Matched route, once lookup succeeded
    #[must_use]
    pub const fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Record the matched route
    pub fn set_route(&mut self, route: Arc<Route>) {
        self.route = Some(route);
    }

    /// Action of the matched route, when it is not a raw handler
    #[must_use]
    pub fn action(&self) -> Option<&Action> {
        match self.route.as_deref()?.target() {
            RouteTarget::Action(action) => Some(action),
            RouteTarget::Handler(_) => None,
        }
    }

    /// Bound arguments
    #[must_use]
    pub fn parameters(&self) -> &[BoundArg] {
        &self.parameters
    }

    /// Store the bound arguments
    pub fn set_parameters(&mut self, parameters: Vec<BoundArg>) {
        self.parameters = parameters;
    }

    /// The request
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// The request, mutably
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The response
    #[must_use]
    pub const fn response(&self) -> &Response {
        &self.response
    }

    /// The response, mutably
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Borrow request and response at the same time
    pub fn parts_mut(&mut self) -> (&mut Request, &mut Response) {
        (&mut self.request, &mut self.response)
    }

    /// Finish the dispatch and keep the response
    #[must_use]
    pub fn into_response(self) -> Response {
        self.response
    }
}

/// Per-request dispatch engine
///
/// Holds only read-only state; one instance serves any number of
/// concurrent dispatches.
pub struct Dispatcher {
    router: Arc<Router>,
    config: DispatchConfig,
    container: Container,
    views: Arc<dyn ViewResolver>,
    statics: Arc<dyn StaticFiles>,
}

impl Dispatcher {
    /// Dispatcher over `router` with default configuration and collaborators
    #[must_use]
    pub fn new(router: Router) -> Self {
        install_panic_trace();
        let config = DispatchConfig::default();
        Self {
            router: Arc::new(router),
            statics: Arc::new(DirStaticFiles::new(config.static_root.clone())),
            config,
            container: Container::new(),
            views: Arc::new(DefaultViewResolver::default()),
        }
    }

    /// Replace the configuration
    ///
    /// Also points the built-in static collaborator at the new
    /// `static_root`; install a custom one afterwards.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.statics = Arc::new(DirStaticFiles::new(config.static_root.clone()));
        self.config = config;
        self
    }

    /// Use `container` for controllers and injected services
    #[must_use]
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    /// Use a custom view resolver
    #[must_use]
    pub fn with_views(mut self, views: Arc<dyn ViewResolver>) -> Self {
        self.views = views;
        self
    }

    /// Use a custom static-file collaborator
    #[must_use]
    pub fn with_static_files(mut self, statics: Arc<dyn StaticFiles>) -> Self {
        self.statics = statics;
        self
    }

    /// Routing table
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Bean container
    #[must_use]
    pub const fn container(&self) -> &Container {
        &self.container
    }

    /// Dispatch one request.
    ///
    /// The returned response is finished, or abandoned when the connection
    /// closed before an error page could be written.
    pub async fn dispatch(&self, request: Request) -> Response {
        debug!("{}\t{}\t{}", request.protocol(), request.method(), request.uri());

        let context = WebContext::from_request(&request);
        let mut invoker = Invoker::new(request);
        context.scope(self.run(&mut invoker)).await;
        invoker.into_response()
    }

    async fn run(&self, invoker: &mut Invoker) {
        let outcome = AssertUnwindSafe(self.pipeline(invoker)).catch_unwind().await;
        let result = outcome.unwrap_or_else(|payload| {
            Err(Error::Panic {
                message: panic_message(payload.as_ref()),
                trace: take_panic_trace(),
            })
        });

        if let Err(err) = result {
            self.handle_error(invoker, &err);
        }

        if !invoker.response().is_abandoned() {
            invoker.response_mut().finish();
        }
    }

    async fn pipeline(&self, invoker: &mut Invoker) -> Result<()> {
        let uri = invoker.request().uri().to_string();

        if self.config.is_static(&uri) {
            let (request, response) = invoker.parts_mut();
            let request = &*request;
            return self
                .statics
                .handle(request.connection(), request, response)
                .await;
        }

        let Some(matched) = self.router.lookup_route(invoker.request().method(), &uri) else {
            return self.not_found(invoker, &uri);
        };
        invoker.request_mut().init_path_params(matched.params);
        invoker.set_route(matched.route);

        let parameters = ArgumentBinder::new(&self.container).bind(invoker)?;
        invoker.set_parameters(parameters);

        let hooks = HookRunner::new(self.views.as_ref());
        if !hooks.run_before(&self.router.middleware(), invoker).await? {
            return Ok(());
        }
        if !hooks.run_before(&self.router.get_before(&uri), invoker).await? {
            return Ok(());
        }

        let written = HandlerInvoker::new(&self.container, self.views.as_ref())
            .invoke(invoker)
            .await?;
        debug!(uri = %uri, view = written, "Route handled");

        hooks.run_after(&self.router.get_after(&uri), invoker).await?;
        Ok(())
    }

    fn not_found(&self, invoker: &mut Invoker, uri: &str) -> Result<()> {
        debug!(uri, "No route matched");
        invoker.response_mut().not_found();
        match &self.config.page_404 {
            Some(view) => self.views.render(view, invoker),
            None => invoker.response_mut().html(ui::not_found_page(uri)),
        }
    }

    fn handle_error(&self, invoker: &mut Invoker, err: &Error) {
        error!(
            uri = invoker.request().uri(),
            error_type = %err.type_name(),
            error = %err,
            "Dispatch failed"
        );

        let connection = invoker.request().connection();
        if !connection.is_active() {
            connection.close();
            invoker.response_mut().abandon();
            return;
        }

        invoker.response_mut().set_status(500);
        let written = match &self.config.page_500 {
            Some(view) => {
                let request = invoker.request_mut();
                request.set_attribute("error", err.to_string());
                request.set_attribute("stackTrace", err.trace());
                self.views.render(view, invoker)
            }
            None => invoker.response_mut().html(ui::error_page(err)),
        };

        if let Err(page_err) = written {
            warn!(error = %page_err, "Error page not written");
            if !invoker.response().is_committed() {
                if let Err(e) = invoker.response_mut().html(ui::error_page(err)) {
                    warn!(error = %e, "Fallback error page not written");
                }
            }
        }
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records where the panic happened.
///
/// The record lives in a thread local: `catch_unwind` catches on the
/// panicking thread, and [`take_panic_trace`] runs in the same poll.
fn install_panic_trace() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let mut trace = String::new();
            if let Some(location) = info.location() {
                let (file, line) = (location.file(), location.line());
                let _ = writeln!(trace, "at {file}:{line}:{}", location.column());
            }
            let _ = write!(trace, "{}", Backtrace::force_capture());
            PANIC_TRACE.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(trace);
                }
            });
            previous(info);
        }));
    });
}

fn take_panic_trace() -> String {
    PANIC_TRACE
        .with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .unwrap_or_default()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
