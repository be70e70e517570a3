//! # Argument Binding
//!
//! Turns an action's declared parameters into a positional argument list
//! taken from the request: path parameters, query parameters, the JSON body,
//! the request and response themselves, and container beans.
//!
//! Conversion failures are `Error::Binding` and abort the dispatch; nothing
//! falls back to a default silently.

use crate::container::Container;
use crate::dispatcher::Invoker;
use crate::error::{Error, Result};
use crate::handler::Target;
use crate::json::parse_body;
use crate::request::Request;
use crate::response::Response;
use crate::route::{Route, RouteTarget};
use crate::types::{ParamType, ParamValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::TypeId;
use std::sync::Arc;

/// Where a declared parameter comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Path segment; `None` uses the type declared in the route pattern
    Path(Option<ParamType>),
    /// Query string value; absent values bind as `None`
    Query(ParamType),
    /// Request body parsed as JSON (`null` when empty)
    Body,
    /// The request itself
    Request,
    /// The response itself
    Response,
    /// A bean resolved from the container
    Service {
        /// Bean type
        type_id: TypeId,
        /// Bean type name, for errors
        type_name: &'static str,
    },
}

/// One declared action parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    kind: ParamKind,
}

impl Param {
    /// Path parameter typed by the route pattern
    pub fn path(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ParamKind::Path(None) }
    }

    /// Path parameter converted to `param_type`
    pub fn path_as(name: impl Into<String>, param_type: ParamType) -> Self {
        Self { name: name.into(), kind: ParamKind::Path(Some(param_type)) }
    }

    /// Query parameter converted to `param_type`
    pub fn query(name: impl Into<String>, param_type: ParamType) -> Self {
        Self { name: name.into(), kind: ParamKind::Query(param_type) }
    }

    /// JSON request body
    pub fn body(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ParamKind::Body }
    }

    /// The request
    #[must_use]
    pub fn request() -> Self {
        Self { name: "request".to_string(), kind: ParamKind::Request }
    }

    /// The response
    #[must_use]
    pub fn response() -> Self {
        Self { name: "response".to_string(), kind: ParamKind::Response }
    }

    /// Container bean of type `T`
    pub fn service<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Service {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        }
    }

    /// Declared name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind
    #[must_use]
    pub const fn kind(&self) -> &ParamKind {
        &self.kind
    }
}

/// A bound argument, stored on the invoker until the action runs
///
/// Request and response are placeholders; [`Args`] hands out borrows of the
/// live objects at call time.
#[derive(Clone)]
pub enum BoundArg {
    /// Converted path parameter
    Path {
        /// Parameter name
        name: String,
        /// Converted value
        value: ParamValue,
    },
    /// Converted query parameter
    Query {
        /// Parameter name
        name: String,
        /// Converted value, `None` when absent
        value: Option<ParamValue>,
    },
    /// Parsed JSON body
    Body {
        /// Parameter name
        name: String,
        /// Parsed body
        value: Value,
    },
    /// The request
    Request,
    /// The response
    Response,
    /// Resolved bean
    Service {
        /// Parameter name
        name: String,
        /// Bean instance
        bean: Target,
    },
}

impl std::fmt::Debug for BoundArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path { name, value } => write!(f, "Path({name}={value:?})"),
            Self::Query { name, value } => write!(f, "Query({name}={value:?})"),
            Self::Body { name, value } => write!(f, "Body({name}={value})"),
            Self::Request => f.write_str("Request"),
            Self::Response => f.write_str("Response"),
            Self::Service { name, .. } => write!(f, "Service({name})"),
        }
    }
}

impl BoundArg {
    fn name(&self) -> &str {
        match self {
            Self::Path { name, .. }
            | Self::Query { name, .. }
            | Self::Body { name, .. }
            | Self::Service { name, .. } => name,
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Produces argument lists for matched action routes
pub struct ArgumentBinder<'d> {
    container: &'d Container,
}

impl<'d> ArgumentBinder<'d> {
    /// Create a binder resolving beans from `container`
    #[must_use]
    pub const fn new(container: &'d Container) -> Self {
        Self { container }
    }

    /// Bind the arguments for the route held by `invoker`.
    ///
    /// Raw handler routes take no arguments and bind to an empty list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` naming the parameter and target type when a
    /// value is missing or does not convert, and the container's error for
    /// unknown beans.
    pub fn bind(&self, invoker: &Invoker) -> Result<Vec<BoundArg>> {
        let Some(route) = invoker.route() else {
            return Ok(Vec::new());
        };
        self.bind_route(route, invoker.request())
    }

    /// Bind the arguments of `route` from `request`
    ///
    /// # Errors
    ///
    /// See [`ArgumentBinder::bind`].
    pub fn bind_route(&self, route: &Route, request: &Request) -> Result<Vec<BoundArg>> {
        let RouteTarget::Action(action) = route.target() else {
            return Ok(Vec::new());
        };

        action
            .params()
            .iter()
            .map(|param| self.bind_one(route, param, request))
            .collect()
    }

    fn bind_one(&self, route: &Route, param: &Param, request: &Request) -> Result<BoundArg> {
        let name = param.name.clone();
        match &param.kind {
            ParamKind::Path(declared) => {
                let param_type = declared.unwrap_or_else(|| route.pattern().get_param_type(&name));
                let raw = request.path_param(&name).ok_or_else(|| {
                    Error::binding(&name, param_type.name(), "not present in route path")
                })?;
                let value = param_type.convert(&name, raw)?;
                Ok(BoundArg::Path { name, value })
            }
            ParamKind::Query(param_type) => {
                let value = request
                    .query(&name)
                    .map(|raw| param_type.convert(&name, raw))
                    .transpose()?;
                Ok(BoundArg::Query { name, value })
            }
            ParamKind::Body => {
                let value = parse_body(request.body())
                    .map_err(|e| Error::binding(&name, "json", e.to_string()))?;
                Ok(BoundArg::Body { name, value })
            }
            ParamKind::Request => Ok(BoundArg::Request),
            ParamKind::Response => Ok(BoundArg::Response),
            ParamKind::Service { type_id, type_name } => {
                let bean = self.container.resolve_bean(*type_id, type_name)?;
                Ok(BoundArg::Service { name, bean })
            }
        }
    }
}

/// Arguments handed to an action body
///
/// Accessors take the declared position and fail with `Error::Binding` when
/// the argument there has a different shape.
pub struct Args<'a> {
    values: Vec<BoundArg>,
    request: &'a Request,
    response: &'a mut Response,
}

impl<'a> Args<'a> {
    /// Assemble arguments over the live request and response
    pub fn new(values: Vec<BoundArg>, request: &'a Request, response: &'a mut Response) -> Self {
        Self { values, request, response }
    }

    /// Number of bound arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments were bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw bound argument
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` if `index` is out of range.
    pub fn get(&self, index: usize) -> Result<&BoundArg> {
        self.values.get(index).ok_or_else(|| {
            Error::binding(format!("#{index}"), "argument", "no argument at this position")
        })
    }

    /// Path or query value; `None` for an absent query parameter
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` if the argument is not a path or query value.
    pub fn value(&self, index: usize) -> Result<Option<&ParamValue>> {
        match self.get(index)? {
            BoundArg::Path { value, .. } => Ok(Some(value)),
            BoundArg::Query { value, .. } => Ok(value.as_ref()),
            other => Err(mismatch(other, "path or query value")),
        }
    }

    fn required(&self, index: usize, target: &str) -> Result<&ParamValue> {
        self.value(index)?.ok_or_else(|| {
            let name = self.values.get(index).map_or("?", BoundArg::name);
            Error::binding(name, target, "missing")
        })
    }

    /// String value
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` when absent or not a string.
    pub fn str(&self, index: usize) -> Result<&str> {
        let value = self.required(index, "string")?;
        value.as_str().ok_or_else(|| typed_mismatch(&self.values[index], "string"))
    }

    /// Integer value
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` when absent or not an integer.
    pub fn int(&self, index: usize) -> Result<i64> {
        let value = self.required(index, "int")?;
        value.as_int().ok_or_else(|| typed_mismatch(&self.values[index], "int"))
    }

    /// Float value
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` when absent or not a float.
    pub fn float(&self, index: usize) -> Result<f64> {
        let value = self.required(index, "float")?;
        value.as_float().ok_or_else(|| typed_mismatch(&self.values[index], "float"))
    }

    /// Boolean value
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` when absent or not a boolean.
    pub fn bool(&self, index: usize) -> Result<bool> {
        let value = self.required(index, "bool")?;
        value.as_bool().ok_or_else(|| typed_mismatch(&self.values[index], "bool"))
    }

    /// Deserialize the JSON body argument
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` if the argument is not the body or does not
    /// deserialize into `T`.
    pub fn body<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        match self.get(index)? {
            BoundArg::Body { name, value } => serde_json::from_value(value.clone()).map_err(|e| {
                Error::binding(name, std::any::type_name::<T>(), e.to_string())
            }),
            other => Err(mismatch(other, "body")),
        }
    }

    /// Container bean argument
    ///
    /// # Errors
    ///
    /// Returns `Error::Binding` if the argument is not a bean of type `S`.
    pub fn service<S: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<S>> {
        match self.get(index)? {
            BoundArg::Service { name, bean } => bean.clone().downcast::<S>().map_err(|_| {
                Error::binding(name, std::any::type_name::<S>(), "bean has a different type")
            }),
            other => Err(mismatch(other, std::any::type_name::<S>())),
        }
    }

    /// The request
    #[must_use]
    pub const fn request(&self) -> &Request {
        self.request
    }

    /// The response
    pub fn response(&mut self) -> &mut Response {
        &mut *self.response
    }
}

fn mismatch(arg: &BoundArg, target: &str) -> Error {
    Error::binding(arg.name(), target, format!("argument is {arg:?}"))
}

fn typed_mismatch(arg: &BoundArg, target: &str) -> Error {
    Error::binding(arg.name(), target, "bound with a different type")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Action;
    use crate::router::Method;
    use crate::view::Reply;
    use std::collections::HashMap;

    struct Users;

    struct Repo {
        name: &'static str,
    }

    fn route(pattern: &str, params: Vec<Param>) -> Route {
        let action = Action::new::<Users, _>("show", params, |_users, _args| {
            Box::pin(async { Ok(Reply::Empty) })
        });
        Route::new(Method::Get, pattern, action)
    }

    fn request(uri: &str, params: &[(&str, &str)]) -> Request {
        let mut req = Request::new(Method::Get, uri);
        req.init_path_params(
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<HashMap<_, _>>(),
        );
        req
    }

    #[test]
    fn test_binds_path_param_as_string() {
        let container = Container::new();
        let route = route("/users/:id", vec![Param::path("id")]);
        let args = ArgumentBinder::new(&container)
            .bind_route(&route, &request("/users/42", &[("id", "42")]))
            .unwrap();
        assert!(matches!(
            &args[0],
            BoundArg::Path { name, value: ParamValue::String(v) } if name == "id" && v == "42"
        ));
    }

    #[test]
    fn test_path_type_from_pattern() {
        let container = Container::new();
        let route = route("/users/{id:int}", vec![Param::path("id")]);
        let args = ArgumentBinder::new(&container)
            .bind_route(&route, &request("/users/42", &[("id", "42")]))
            .unwrap();
        assert!(matches!(&args[0], BoundArg::Path { value: ParamValue::Int(42), .. }));
    }

    #[test]
    fn test_conversion_failure_is_binding_error() {
        let container = Container::new();
        let route = route("/users/:id", vec![Param::path_as("id", ParamType::Int)]);
        let err = ArgumentBinder::new(&container)
            .bind_route(&route, &request("/users/abc", &[("id", "abc")]))
            .unwrap_err();
        match err {
            Error::Binding { name, target, .. } => {
                assert_eq!(name, "id");
                assert_eq!(target, "int");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_query_params_optional() {
        let container = Container::new();
        let route = route(
            "/users",
            vec![Param::query("page", ParamType::Int), Param::query("sort", ParamType::String)],
        );
        let args = ArgumentBinder::new(&container)
            .bind_route(&route, &request("/users?page=3", &[]))
            .unwrap();
        assert!(matches!(&args[0], BoundArg::Query { value: Some(ParamValue::Int(3)), .. }));
        assert!(matches!(&args[1], BoundArg::Query { value: None, .. }));
    }

    #[test]
    fn test_body_must_be_json() {
        let container = Container::new();
        let route = route("/users", vec![Param::body("user")]);

        let ok = request("/users", &[]).with_body(r#"{"name":"ada"}"#);
        let args = ArgumentBinder::new(&container).bind_route(&route, &ok).unwrap();
        assert!(matches!(&args[0], BoundArg::Body { value, .. } if value["name"] == "ada"));

        let empty = request("/users", &[]);
        let args = ArgumentBinder::new(&container).bind_route(&route, &empty).unwrap();
        assert!(matches!(&args[0], BoundArg::Body { value: Value::Null, .. }));

        let bad = request("/users", &[]).with_body("{not json");
        let err = ArgumentBinder::new(&container).bind_route(&route, &bad).unwrap_err();
        assert!(matches!(err, Error::Binding { ref name, .. } if name == "user"));
    }

    #[test]
    fn test_services_and_context_objects() {
        let container = Container::new();
        container.register_instance(Repo { name: "users" });
        let route = route(
            "/users",
            vec![Param::request(), Param::response(), Param::service::<Repo>("repo")],
        );
        let req = request("/users", &[]);
        let values = ArgumentBinder::new(&container).bind_route(&route, &req).unwrap();
        assert!(matches!(values[0], BoundArg::Request));
        assert!(matches!(values[1], BoundArg::Response));

        let mut resp = Response::new();
        let mut args = Args::new(values, &req, &mut resp);
        assert_eq!(args.service::<Repo>(2).unwrap().name, "users");
        assert!(args.int(2).is_err());
        args.response().set_status(201);
        assert_eq!(args.request().uri(), "/users");
        assert_eq!(resp.status(), 201);
    }

    #[test]
    fn test_missing_service_fails() {
        let container = Container::new();
        let route = route("/users", vec![Param::service::<Repo>("repo")]);
        let err = ArgumentBinder::new(&container)
            .bind_route(&route, &request("/users", &[]))
            .unwrap_err();
        assert!(matches!(err, Error::BeanNotFound { .. }));
    }
}
