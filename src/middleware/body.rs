//! Eager body parsing for `POST` requests.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::method::Method;
use crate::reply::Reply;
use crate::request::{BodyData, RequestContext};

/// Result of trying to parse a body for a given content type.
#[derive(Debug)]
pub(crate) enum Parsed {
    Data(BodyData),
    /// The content type is not one we parse.
    Unsupported,
    /// Supported content type, unusable body. Carries a client-facing reason.
    Malformed(String),
}

/// Parses `POST` bodies and attaches the result to the context.
///
/// JSON bodies become [`BodyData::Json`]; urlencoded and multipart bodies
/// become [`BodyData::Form`]. Other content types, and bodies that fail to
/// parse, pass through untouched: the binder reports them if the handler
/// actually needs the data.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyParser;

impl Middleware for BodyParser {
    fn call<'a>(&'a self, mut ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            if ctx.method() == Method::Post {
                if let Some(content_type) = ctx.content_type() {
                    match parse(&mut ctx, &content_type).await? {
                        Parsed::Data(data) => {
                            debug!(content_type = %content_type, data = ?data, "request body parsed");
                            ctx.set_data(data);
                        }
                        Parsed::Malformed(reason) => warn!(%reason, "request body not parsed"),
                        Parsed::Unsupported => {}
                    }
                }
            }
            next.run(ctx).await
        })
    }
}

/// Reads and parses the body of `ctx` according to `content_type`.
///
/// Only body read failures are errors; everything else is a [`Parsed`] value.
pub(crate) async fn parse(ctx: &mut RequestContext, content_type: &str) -> Result<Parsed, Error> {
    if content_type.starts_with("application/json") {
        let body = ctx.read_body().await?;
        return Ok(match serde_json::from_slice(&body) {
            Ok(value) => Parsed::Data(BodyData::Json(value)),
            Err(e) => Parsed::Malformed(format!("Malformed JSON body: {e}")),
        });
    }
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let body = ctx.read_body().await?;
        return Ok(Parsed::Data(BodyData::Form(urlencoded_fields(&body))));
    }
    if content_type.starts_with("multipart/form-data") {
        let Some(boundary) = ctx.header("content-type").and_then(multipart_boundary) else {
            return Ok(Parsed::Malformed("Malformed multipart body: missing boundary".to_owned()));
        };
        let body = ctx.read_body().await?;
        return Ok(Parsed::Data(BodyData::Form(multipart_fields(&body, &boundary))));
    }
    Ok(Parsed::Unsupported)
}

/// First value wins for repeated field names.
fn urlencoded_fields(body: &[u8]) -> Map<String, Value> {
    let mut fields = Map::new();
    for (k, v) in url::form_urlencoded::parse(body) {
        fields.entry(k.into_owned()).or_insert_with(|| Value::String(v.into_owned()));
    }
    fields
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_owned())
        .filter(|b| !b.is_empty())
}

/// Text fields of a multipart body. File parts are skipped.
fn multipart_fields(body: &[u8], boundary: &str) -> Map<String, Value> {
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);
    let mut fields = Map::new();

    for part in text.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let Some((head, value)) = part.split_once("\r\n\r\n") else { continue };
        let Some(disposition) = head
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-disposition:"))
        else {
            continue;
        };
        let params: Vec<&str> = disposition.split(';').map(str::trim).collect();
        if params.iter().any(|p| p.starts_with("filename=")) {
            continue;
        }
        let Some(name) = params.iter().find_map(|p| p.strip_prefix("name=")) else { continue };
        let value = value.strip_suffix("\r\n").unwrap_or(value);
        fields
            .entry(name.trim_matches('"').to_owned())
            .or_insert_with(|| Value::String(value.to_owned()));
    }
    fields
}
