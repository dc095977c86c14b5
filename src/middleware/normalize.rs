//! Maps a handler's [`Reply`] onto exactly one wire response shape.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde_json::{Map, Value};

use super::{Middleware, Next};
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::identity::Identity;
use crate::reply::{Reply, stringify};
use crate::request::RequestContext;
use crate::response::{ContentType, Response};
use crate::template::TemplateRenderer;

/// Mapping key naming the template to render.
pub const TEMPLATE_KEY: &str = "__template__";
/// Mapping key the current user is injected under before rendering.
pub const USER_KEY: &str = "__user__";
/// Text replies starting with this prefix are redirects.
pub const REDIRECT_PREFIX: &str = "redirect:";

/// The closed set of response shapes.
#[derive(Debug)]
pub enum ResponseVariant {
    Stream(Response),
    RawBytes(Bytes),
    Redirect(String),
    Html(String),
    Json(Map<String, Value>),
    TemplatedHtml { template: String, context: Map<String, Value> },
    StatusOnly(StatusCode),
    StatusWithBody(StatusCode, String),
    PlainText(String),
}

fn status_in_range(code: &Value) -> Option<StatusCode> {
    code.as_i64().and_then(status_from_i64)
}

fn status_from_i64(code: i64) -> Option<StatusCode> {
    if (100..600).contains(&code) {
        u16::try_from(code).ok().and_then(|c| StatusCode::from_u16(c).ok())
    } else {
        None
    }
}

/// Picks the variant for `reply`. First matching rule wins:
///
/// 1. finished response → `Stream`
/// 2. bytes → `RawBytes`
/// 3. text starting with `redirect:` → `Redirect`
/// 4. other text → `Html`
/// 5. mapping with a string `__template__` → `TemplatedHtml` (with `__user__`
///    set to `user`), any other mapping → `Json`
/// 6. integer in `[100, 600)` → `StatusOnly`
/// 7. pair whose first element is an integer in `[100, 600)` → `StatusWithBody`
/// 8. anything else → `PlainText`
pub fn normalize(reply: Reply, user: Option<&Identity>) -> ResponseVariant {
    match reply {
        Reply::Stream(r) => ResponseVariant::Stream(r),
        Reply::Bytes(b) => ResponseVariant::RawBytes(b),
        Reply::Text(t) => match t.strip_prefix(REDIRECT_PREFIX) {
            Some(location) => ResponseVariant::Redirect(location.to_owned()),
            None => ResponseVariant::Html(t),
        },
        Reply::Map(mut m) => match m.get(TEMPLATE_KEY) {
            Some(Value::String(name)) => {
                let template = name.clone();
                let user = user
                    .and_then(|u| serde_json::to_value(u).ok())
                    .unwrap_or(Value::Null);
                m.insert(USER_KEY.to_owned(), user);
                ResponseVariant::TemplatedHtml { template, context: m }
            }
            _ => ResponseVariant::Json(m),
        },
        Reply::Int(n) => match status_from_i64(n) {
            Some(code) => ResponseVariant::StatusOnly(code),
            None => ResponseVariant::PlainText(n.to_string()),
        },
        Reply::Pair(code, message) => match status_in_range(&code) {
            Some(code) => ResponseVariant::StatusWithBody(code, stringify(&message)),
            None => ResponseVariant::PlainText(Value::Array(vec![code, message]).to_string()),
        },
        Reply::Value(v) => ResponseVariant::PlainText(stringify(&v)),
    }
}

impl ResponseVariant {
    /// Produces the wire response. Template rendering needs `templates`.
    pub fn render(self, templates: Option<&dyn TemplateRenderer>) -> Result<Response, Error> {
        Ok(match self {
            Self::Stream(r) => r,
            Self::RawBytes(b) => Response::builder().bytes(ContentType::OctetStream, b),
            Self::Redirect(location) => Response::redirect(&location),
            Self::Html(body) => Response::html(body),
            Self::Json(m) => Response::json(serde_json::to_vec(&m)?),
            Self::TemplatedHtml { template, context } => {
                let Some(renderer) = templates else {
                    return Err(Error::Template {
                        name: template,
                        reason: "no template renderer configured".to_owned(),
                    });
                };
                Response::html(renderer.render(&template, &context)?)
            }
            Self::StatusOnly(code) => Response::status(code),
            Self::StatusWithBody(code, body) => Response::builder().status(code).text(body),
            Self::PlainText(body) => Response::text(body),
        })
    }
}

/// Innermost standard stage: sees the raw handler result and turns it into a
/// response.
#[derive(Clone, Default)]
pub struct ResponseNormalizer {
    templates: Option<Arc<dyn TemplateRenderer>>,
}

impl ResponseNormalizer {
    pub fn new(templates: Arc<dyn TemplateRenderer>) -> Self {
        Self { templates: Some(templates) }
    }

    /// A normalizer that cannot render templates; template replies fail.
    pub fn without_templates() -> Self {
        Self::default()
    }
}

impl Middleware for ResponseNormalizer {
    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            let user = ctx.user().cloned();
            let reply = next.run(ctx).await?;
            let response = normalize(reply, user.as_ref()).render(self.templates.as_deref())?;
            Ok(Reply::Stream(response))
        })
    }
}
