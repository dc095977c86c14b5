//! Request-time argument binding and handler invocation.
//!
//! Given a route's [`HandlerDescriptor`] and the request, the binder decides
//! where the handler's arguments come from:
//!
//! 1. Handlers that declare no named parameters and no keyword bag only ever
//!    see the path captures.
//! 2. `POST` requests use the parsed body (JSON object or form fields). The
//!    query string is ignored.
//! 3. `GET` requests use the query string; for a repeated key the first value
//!    wins. The body is ignored.
//! 4. A candidate source from (2) or (3) is narrowed to the declared names
//!    (unless the handler takes a keyword bag) and then path captures are
//!    merged over it. With no candidate source the path captures are used as
//!    they are, unfiltered.
//!
//! Structural failures become `400 Bad Request` with a plain-text reason;
//! [`ApiError`](crate::ApiError)s raised by the handler become JSON error
//! objects.

use std::sync::Arc;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::descriptor::HandlerDescriptor;
use crate::identity::Identity;
use crate::method::Method;
use crate::middleware::body::{self, Parsed};
use crate::reply::{Reply, stringify};
use crate::request::{BodyData, RequestContext};
use crate::response::Response;
use crate::router::Route;

/// The arguments assembled for one handler call.
pub struct Args {
    values: Map<String, Value>,
    context: Option<RequestContext>,
    descriptor: Arc<HandlerDescriptor>,
}

impl Args {
    /// Builds arguments by hand, e.g. to call a handler from a test.
    pub fn new(
        descriptor: Arc<HandlerDescriptor>,
        values: Map<String, Value>,
        context: Option<RequestContext>,
    ) -> Self {
        Self { values, context, descriptor }
    }

    /// Raw value of `name`, falling back to the declared default.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| {
            self.descriptor.defaults().iter().find(|(k, _)| k == name).map(|(_, v)| v)
        })
    }

    /// `name` as text. Non-string values are rendered as JSON.
    pub fn text(&self, name: &str) -> Result<String, Error> {
        self.value(name)
            .map(stringify)
            .ok_or_else(|| Error::MissingArgument(name.to_owned()))
    }

    /// `name` deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        let value = self.value(name).ok_or_else(|| Error::MissingArgument(name.to_owned()))?;
        T::deserialize(value).map_err(|e| Error::InvalidArgument {
            name: name.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Every assembled value, including ones only a keyword bag would accept.
    pub fn values(&self) -> &Map<String, Value> { &self.values }

    /// Values not claimed by a declared positional or named parameter.
    pub fn extra(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(k, _)| {
                !self.descriptor.named().contains(*k) && !self.descriptor.positional().contains(*k)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The request context, for handlers that declared it.
    pub fn context(&self) -> Result<&RequestContext, Error> {
        self.context.as_ref().ok_or_else(|| Error::MissingArgument("request".to_owned()))
    }

    pub fn take_context(&mut self) -> Option<RequestContext> {
        self.context.take()
    }

    /// Shortcut for `args.context()?.user()`.
    pub fn user(&self) -> Option<&Identity> {
        self.context.as_ref().and_then(RequestContext::user)
    }
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("values", &self.values)
            .field("request", &self.context.is_some())
            .finish()
    }
}

/// Outcome of binding: arguments ready for the handler, or a 400 response.
pub(crate) enum Binding {
    Ready(Args),
    Rejected(Response),
}

fn bad_request(reason: impl Into<String>) -> Binding {
    Binding::Rejected(
        Response::builder().status(StatusCode::BAD_REQUEST).text(reason),
    )
}

/// Builds the argument set for `plan` from `ctx`.
pub(crate) async fn bind(
    plan: &Arc<HandlerDescriptor>,
    mut ctx: RequestContext,
) -> Result<Binding, Error> {
    let mut candidate: Option<Map<String, Value>> = None;

    if plan.wants_request_data() {
        match ctx.method() {
            Method::Post => {
                let Some(content_type) = ctx.content_type() else {
                    return Ok(bad_request("Missing Content-Type."));
                };
                let parsed = ctx.data().cloned();
                let data = match parsed {
                    Some(data) => data,
                    None => match body::parse(&mut ctx, &content_type).await? {
                        Parsed::Data(data) => data,
                        Parsed::Unsupported => {
                            return Ok(bad_request(format!("Unsupported Content-Type: {content_type}")));
                        }
                        Parsed::Malformed(reason) => return Ok(bad_request(reason)),
                    },
                };
                match data {
                    BodyData::Json(Value::Object(map)) | BodyData::Form(map) => candidate = Some(map),
                    BodyData::Json(_) => return Ok(bad_request("JSON body must be object.")),
                }
            }
            Method::Get => {
                candidate = ctx.query_string().map(parse_query);
            }
            _ => {}
        }
    }

    let values = match candidate {
        None => ctx
            .params()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
        Some(mut kw) => {
            if !plan.accepts_rest() && !plan.named().is_empty() {
                kw.retain(|k, _| plan.named().contains(k));
            }
            for (k, v) in ctx.params() {
                if kw.contains_key(k) {
                    warn!(name = %k, "duplicate arg name in named arg and path capture");
                }
                kw.insert(k.clone(), Value::String(v.clone()));
            }
            kw
        }
    };

    if let Some(missing) = plan.required().iter().find(|name| !values.contains_key(*name)) {
        return Ok(bad_request(format!("Missing argument: {missing}")));
    }

    debug!(args = ?values, "call with args");
    let context = plan.accepts_context().then_some(ctx);
    Ok(Binding::Ready(Args::new(Arc::clone(plan), values, context)))
}

/// Binds arguments for `route` and runs its handler.
///
/// API errors raised by the handler are turned into their JSON reply here;
/// any other error propagates and aborts the chain.
pub(crate) async fn invoke(route: &Route, ctx: RequestContext) -> Result<Reply, Error> {
    let args = match bind(&route.descriptor, ctx).await? {
        Binding::Ready(args) => args,
        Binding::Rejected(response) => return Ok(Reply::Stream(response)),
    };
    match route.handler.call(args).await {
        Ok(reply) => Ok(reply),
        Err(Error::Api(e)) => {
            info!(code = e.code(), data = e.data(), "handler raised api error");
            Ok(e.to_reply())
        }
        Err(e) => Err(e),
    }
}

/// Parses a query string. For a repeated key the first value is kept and the
/// rest are dropped.
pub(crate) fn parse_query(qs: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in url::form_urlencoded::parse(qs.as_bytes()) {
        out.entry(k.into_owned()).or_insert_with(|| Value::String(v.into_owned()));
    }
    out
}
