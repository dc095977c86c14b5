//! Handler parameter declarations and the binding plan built from them.
//!
//! A handler states its parameters once, at registration:
//!
//! ```rust
//! use plinth::{HandlerDescriptor, Method, Params};
//!
//! // POST /api/blogs/{id}/comments: `id` from the path, the request context,
//! // then a required `content` field from the body.
//! let params = Params::new().arg("id").context().required("content");
//! let plan = HandlerDescriptor::build(Method::Post, "/api/blogs/{id}/comments", &params).unwrap();
//! assert!(plan.accepts_context());
//! assert_eq!(plan.required(), ["content"]);
//! ```
//!
//! The resulting [`HandlerDescriptor`] is immutable and is consulted by the
//! binder on every request; nothing about the handler is re-inspected later.

use serde_json::Value;

use crate::error::Error;
use crate::method::Method;

/// How one declared parameter receives its value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    /// Bound by name from the assembled arguments, never checked for presence
    /// by the binder. Typically a path capture.
    Positional,
    /// The request context itself.
    Context,
    /// Keyword-style parameter. `None` default means required.
    Named { default: Option<Value> },
    /// Open-ended bag of extra named values.
    Rest,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

/// Declared parameter list of a handler, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Params {
    list: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameter, usually filled from a path capture.
    pub fn arg(self, name: &str) -> Self {
        self.push(name, ParamKind::Positional)
    }

    /// The request context. Must come after every positional parameter.
    pub fn context(self) -> Self {
        self.push("request", ParamKind::Context)
    }

    /// Named parameter with no default.
    pub fn required(self, name: &str) -> Self {
        self.push(name, ParamKind::Named { default: None })
    }

    /// Named parameter supplied with `default` when the request omits it.
    pub fn optional(self, name: &str, default: impl Into<Value>) -> Self {
        self.push(name, ParamKind::Named { default: Some(default.into()) })
    }

    /// Accept any extra named values. Must be last.
    pub fn rest(self) -> Self {
        self.push("kw", ParamKind::Rest)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.list.iter()
    }

    fn push(mut self, name: &str, kind: ParamKind) -> Self {
        self.list.push(Param { name: name.to_owned(), kind });
        self
    }
}

/// Precomputed binding plan for one registered handler.
#[derive(Clone, Debug)]
pub struct HandlerDescriptor {
    method: Method,
    pattern: String,
    accepts_context: bool,
    accepts_rest: bool,
    positional: Vec<String>,
    named: Vec<String>,
    required: Vec<String>,
    defaults: Vec<(String, Value)>,
}

impl HandlerDescriptor {
    /// Classifies `params` and validates their order.
    ///
    /// Fails when a positional parameter follows the context parameter, when
    /// the context or rest parameter is declared twice, when anything follows
    /// the rest parameter, or when a name repeats.
    pub fn build(method: Method, pattern: &str, params: &Params) -> Result<Self, Error> {
        let mut plan = Self {
            method,
            pattern: pattern.to_owned(),
            accepts_context: false,
            accepts_rest: false,
            positional: Vec::new(),
            named: Vec::new(),
            required: Vec::new(),
            defaults: Vec::new(),
        };
        let mut seen: Vec<&str> = Vec::new();

        for param in params.iter() {
            if plan.accepts_rest {
                return Err(Error::route(pattern, format!(
                    "parameter `{}` declared after the keyword bag", param.name,
                )));
            }
            if seen.contains(&param.name.as_str()) {
                return Err(Error::route(pattern, format!("duplicate parameter `{}`", param.name)));
            }
            seen.push(&param.name);

            match &param.kind {
                ParamKind::Positional if plan.accepts_context => {
                    return Err(Error::route(pattern, format!(
                        "request parameter must be the last positional parameter (found `{}` after it)",
                        param.name,
                    )));
                }
                ParamKind::Positional => plan.positional.push(param.name.clone()),
                ParamKind::Context => plan.accepts_context = true,
                ParamKind::Named { default } => {
                    plan.named.push(param.name.clone());
                    match default {
                        Some(v) => plan.defaults.push((param.name.clone(), v.clone())),
                        None => plan.required.push(param.name.clone()),
                    }
                }
                ParamKind::Rest => plan.accepts_rest = true,
            }
        }
        Ok(plan)
    }

    pub fn method(&self) -> Method { self.method }
    pub fn pattern(&self) -> &str { &self.pattern }
    pub fn accepts_context(&self) -> bool { self.accepts_context }
    pub fn accepts_rest(&self) -> bool { self.accepts_rest }
    pub fn positional(&self) -> &[String] { &self.positional }
    pub fn named(&self) -> &[String] { &self.named }
    pub fn required(&self) -> &[String] { &self.required }
    pub fn defaults(&self) -> &[(String, Value)] { &self.defaults }

    /// Whether the binder needs to look at the query string or body at all.
    pub fn wants_request_data(&self) -> bool {
        self.accepts_rest || !self.named.is_empty() || !self.required.is_empty()
    }
}
