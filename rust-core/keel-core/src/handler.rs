//! # Handlers and Invocation
//!
//! Route targets come in two shapes:
//!
//! - a [`RawHandler`] that receives the request and response and writes the
//!   response itself, and
//! - an [`Action`]: a closure registered for a controller type, called with
//!   the controller instance and the bound arguments, whose [`Reply`] is
//!   written by the view resolver.
//!
//! [`HandlerInvoker`] runs whichever one the matched route holds.

use crate::binder::{Args, Param};
use crate::container::Container;
use crate::dispatcher::Invoker;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::route::RouteTarget;
use crate::view::{Reply, ViewResolver};
use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future borrowing from `'a`
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased controller instance
pub type Target = Arc<dyn Any + Send + Sync>;

/// Raw request/response handler
pub type RawHandler = Arc<
    dyn for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<()>> + Send + Sync,
>;

/// Type-erased action body
pub type ActionFn =
    Arc<dyn for<'a> Fn(Target, Args<'a>) -> BoxFuture<'a, Result<Reply>> + Send + Sync>;

/// Wrap a closure as a [`RawHandler`]
///
/// ```ignore
/// let hello = handler::raw(|_req, res| Box::pin(async move { res.text("hello") }));
/// ```
pub fn raw<F>(f: F) -> RawHandler
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Controller action registered on a route
///
/// Built once at registration time; the closure replaces reflective method
/// lookup with a typed call on the downcast controller.
pub struct Action {
    name: String,
    controller: TypeId,
    controller_name: &'static str,
    params: Vec<Param>,
    call: ActionFn,
}

impl Action {
    /// Register an action on controller type `T`
    ///
    /// `params` declares the positional arguments the binder produces.
    pub fn new<T, F>(name: impl Into<String>, params: Vec<Param>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: for<'a> Fn(Arc<T>, Args<'a>) -> BoxFuture<'a, Result<Reply>> + Send + Sync + 'static,
    {
        let call = erase(move |target: Target, args| match target.downcast::<T>() {
            Ok(controller) => f(controller, args),
            Err(_) => Box::pin(async {
                Err(Error::TargetMismatch {
                    expected: std::any::type_name::<T>().to_string(),
                })
            }),
        });

        Self {
            name: name.into(),
            controller: TypeId::of::<T>(),
            controller_name: std::any::type_name::<T>(),
            params,
            call: Arc::new(call),
        }
    }

    /// Action name, for logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Controller type the action runs on
    #[must_use]
    pub const fn controller_type(&self) -> TypeId {
        self.controller
    }

    /// Controller type name
    #[must_use]
    pub const fn controller_name(&self) -> &'static str {
        self.controller_name
    }

    /// Declared parameters, in call order
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Call the action body
    pub fn call<'a>(&self, target: Target, args: Args<'a>) -> BoxFuture<'a, Result<Reply>> {
        (self.call)(target, args)
    }
}

fn erase<F>(f: F) -> F
where
    F: for<'a> Fn(Target, Args<'a>) -> BoxFuture<'a, Result<Reply>> + Send + Sync + 'static,
{
    f
}

/// Runs the target of the matched route
pub struct HandlerInvoker<'d> {
    container: &'d Container,
    views: &'d dyn ViewResolver,
}

impl<'d> HandlerInvoker<'d> {
    /// Create an invoker over the bean container and view resolver
    #[must_use]
    pub fn new(container: &'d Container, views: &'d dyn ViewResolver) -> Self {
        Self { container, views }
    }

    /// Invoke the route target held by `invoker`.
    ///
    /// A raw handler owns the response and yields `false`. An action's reply
    /// is handed to the view resolver, whose verdict is returned. Faults are
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Any error raised while resolving the target, inside the handler or
    /// action, or while writing the reply.
    pub async fn invoke(&self, invoker: &mut Invoker) -> Result<bool> {
        let route = invoker
            .route()
            .cloned()
            .ok_or_else(|| Error::message("invoke called before a route matched"))?;

        match route.target() {
            RouteTarget::Handler(handler) => {
                let (request, response) = invoker.parts_mut();
                handler(request, response).await?;
                Ok(false)
            }
            RouteTarget::Action(action) => {
                let target = route.resolve_instance(action, self.container)?;
                let values = invoker.parameters().to_vec();
                let reply = {
                    let (request, response) = invoker.parts_mut();
                    action.call(target, Args::new(values, request, response)).await?
                };
                self.views.handle(invoker, reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Param;
    use crate::route::Route;
    use crate::router::Method;
    use crate::types::ParamType;
    use crate::view::{DefaultViewResolver, MemoryTemplates};

    struct Greeter {
        greeting: &'static str,
    }

    fn invoker_for(route: Route, uri: &str) -> Invoker {
        let mut invoker = Invoker::new(Request::new(Method::Get, uri));
        invoker.set_route(Arc::new(route));
        invoker
    }

    fn views() -> DefaultViewResolver {
        DefaultViewResolver::new(Arc::new(MemoryTemplates::new()))
    }

    #[tokio::test]
    async fn test_raw_handler_writes_response() {
        let route = Route::new(
            Method::Get,
            "/raw",
            raw(|req, res| {
                Box::pin(async move {
                    res.set_status(202);
                    res.text(format!("raw {}", req.uri()))
                })
            }),
        );
        let mut invoker = invoker_for(route, "/raw");
        let container = Container::new();
        let views = views();

        let proceed = HandlerInvoker::new(&container, &views).invoke(&mut invoker).await.unwrap();
        assert!(!proceed);
        assert_eq!(invoker.response().status(), 202);
        assert_eq!(invoker.response().body_text(), "raw /raw");
    }

    #[tokio::test]
    async fn test_action_reply_goes_through_views() {
        let action = Action::new::<Greeter, _>(
            "greet",
            vec![Param::path_as("name", ParamType::String)],
            |greeter, args| {
                Box::pin(async move {
                    let name = args.str(0)?;
                    Ok(Reply::Text(format!("{}, {name}", greeter.greeting)))
                })
            },
        );
        let route = Route::new(Method::Get, "/greet/:name", action);
        let mut invoker = invoker_for(route, "/greet/ada");
        invoker.set_parameters(vec![crate::binder::BoundArg::Path {
            name: "name".to_string(),
            value: crate::types::ParamValue::String("ada".to_string()),
        }]);

        let container = Container::new();
        container.register_instance(Greeter { greeting: "hello" });
        let views = views();

        let proceed = HandlerInvoker::new(&container, &views).invoke(&mut invoker).await.unwrap();
        assert!(proceed);
        assert_eq!(invoker.response().body_text(), "hello, ada");
    }

    #[tokio::test]
    async fn test_action_fault_propagates_unchanged() {
        let action = Action::new::<Greeter, _>("fail", Vec::new(), |_greeter, _args| {
            Box::pin(async { Err(Error::message("boom")) })
        });
        let mut invoker = invoker_for(Route::new(Method::Get, "/fail", action), "/fail");
        let container = Container::new();
        container.register_instance(Greeter { greeting: "hi" });
        let views = views();

        let err = HandlerInvoker::new(&container, &views)
            .invoke(&mut invoker)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!invoker.response().is_committed());
    }

    #[tokio::test]
    async fn test_invoke_without_route_fails() {
        let mut invoker = Invoker::new(Request::new(Method::Get, "/"));
        let container = Container::new();
        let views = views();
        assert!(HandlerInvoker::new(&container, &views).invoke(&mut invoker).await.is_err());
    }
}
