//! Route table.
//!
//! One radix tree per HTTP method, O(path-length) lookup. Every entry pairs a
//! handler with the [`HandlerDescriptor`] computed when it was registered.
//! The table is built once at startup and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use matchit::Router as MatchitRouter;
use tracing::info;

use crate::binder;
use crate::descriptor::{HandlerDescriptor, Params};
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::reply::Reply;
use crate::request::RequestContext;
use crate::response::Response;

/// A registered handler and its binding plan.
pub(crate) struct Route {
    pub(crate) descriptor: Arc<HandlerDescriptor>,
    pub(crate) handler: BoxedHandler,
}

/// The application router.
///
/// ```rust,no_run
/// # use plinth::{Args, Error, Method, Params, Reply, Router};
/// # async fn get_blog(_: Args) -> Result<Reply, Error> { Ok(Reply::from("")) }
/// # async fn authenticate(_: Args) -> Result<Reply, Error> { Ok(Reply::from("")) }
/// let router = Router::new()
///     .on(Method::Get,  "/blog/{id}",        Params::new().arg("id"), get_blog)
///     .on(Method::Post, "/api/authenticate", Params::new().required("email").required("passwd"), authenticate);
/// ```
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
    table: Vec<Arc<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for a method + path pair. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics on any error [`try_on`](Router::try_on) would report. Routes are
    /// registered at startup, where a bad table is a programming error.
    pub fn on(self, method: Method, path: &str, params: Params, handler: impl Handler) -> Self {
        self.try_on(method, path, params, handler)
            .unwrap_or_else(|e| panic!("invalid route: {e}"))
    }

    pub fn get(self, path: &str, params: Params, handler: impl Handler) -> Self {
        self.on(Method::Get, path, params, handler)
    }

    pub fn post(self, path: &str, params: Params, handler: impl Handler) -> Self {
        self.on(Method::Post, path, params, handler)
    }

    /// Registers `handler`, reporting a misplaced request-context parameter
    /// or a bad / conflicting path pattern as [`Error::Route`].
    pub fn try_on(
        mut self,
        method: Method,
        path: &str,
        params: Params,
        handler: impl Handler,
    ) -> Result<Self, Error> {
        let descriptor = Arc::new(HandlerDescriptor::build(method, path, &params)?);
        let route = Arc::new(Route { descriptor, handler: handler.into_boxed_handler() });

        self.routes
            .entry(method)
            .or_default()
            .insert(path, Arc::clone(&route))
            .map_err(|e| Error::route(path, e.to_string()))?;

        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        info!(%method, path, params = ?names, "add route");
        self.table.push(route);
        Ok(self)
    }

    /// Registered descriptors, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.table.iter().map(|r| r.descriptor.as_ref())
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }

    /// Terminal step of the chain: find the route, bind, call.
    pub(crate) async fn dispatch(&self, mut ctx: RequestContext) -> Result<Reply, Error> {
        let Some((route, params)) = self.lookup(ctx.method(), ctx.path()) else {
            return Ok(Reply::Stream(Response::status(StatusCode::NOT_FOUND)));
        };
        ctx.params = params;
        binder::invoke(&route, ctx).await
    }
}
