//! Per-request context threaded through the middleware chain.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use http::{Extensions, HeaderMap};
use http_body_util::BodyExt;
use http_body_util::LengthLimitError;
use http_body_util::combinators::UnsyncBoxBody;
use serde_json::{Map, Value};

use crate::error::{BoxError, Error};
use crate::identity::Identity;
use crate::method::Method;

/// A request body that has already been parsed by the body-parsing stage.
#[derive(Clone, Debug, PartialEq)]
pub enum BodyData {
    /// `application/json`: whatever JSON value the client sent.
    Json(Value),
    /// `application/x-www-form-urlencoded` or `multipart/form-data` fields.
    Form(Map<String, Value>),
}

/// An incoming request plus everything middleware attaches to it on the way in.
///
/// Owned by the task serving the request and moved stage to stage; nothing in
/// here is shared with other requests.
pub struct RequestContext {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    // Accessed only through `&mut self`, so the lock is never taken.
    body: Mutex<Option<UnsyncBoxBody<Bytes, BoxError>>>,
    buffered: Option<Bytes>,
    pub(crate) params: HashMap<String, String>,
    data: Option<BodyData>,
    user: Option<Identity>,
    extensions: Extensions,
}

impl RequestContext {
    /// Wraps an `http::Request`. Fails with the original method when it is
    /// not one of the routable verbs.
    pub fn new<B>(req: http::Request<B>) -> Result<Self, http::Method>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let method = Method::try_from(&parts.method).map_err(|()| parts.method.clone())?;
        Ok(Self {
            method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().filter(|q| !q.is_empty()).map(str::to_owned),
            headers: parts.headers,
            body: Mutex::new(Some(body.map_err(Into::into).boxed_unsync())),
            buffered: None,
            params: HashMap::new(),
            data: None,
            user: None,
            extensions: parts.extensions,
        })
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Raw query string without the leading `?`. Empty query strings are `None`.
    pub fn query_string(&self) -> Option<&str> { self.query.as_deref() }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type of the body, lowercased and stripped of parameters
    /// (`"application/json; charset=utf-8"` → `"application/json"`).
    pub fn content_type(&self) -> Option<String> {
        let raw = self.header("content-type")?;
        let media = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        (!media.is_empty()).then_some(media)
    }

    /// Value of the named cookie, if the client sent one.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Returns a named path capture.
    ///
    /// For a route `/blog/{id}`, `ctx.param("id")` on `/blog/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// Reads the whole body. The first call awaits the transport; later calls
    /// return the cached bytes.
    ///
    /// Fails with [`Error::PayloadTooLarge`] when the body was wrapped in an
    /// `http_body_util::Limited` and went over its limit.
    pub async fn read_body(&mut self) -> Result<Bytes, Error> {
        if let Some(bytes) = &self.buffered {
            return Ok(bytes.clone());
        }
        let body = self.body.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        let bytes = match body {
            Some(body) => body
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<LengthLimitError>() { Error::PayloadTooLarge } else { Error::Body(e) }
                })?
                .to_bytes(),
            None => Bytes::new(),
        };
        self.buffered = Some(bytes.clone());
        Ok(bytes)
    }

    /// Body parsed by the body-parsing stage, if it ran and understood the
    /// content type.
    pub fn data(&self) -> Option<&BodyData> { self.data.as_ref() }
    pub fn set_data(&mut self, data: BodyData) { self.data = Some(data); }

    /// The signed-in user resolved by the authentication stage.
    pub fn user(&self) -> Option<&Identity> { self.user.as_ref() }
    pub fn set_user(&mut self, user: Option<Identity>) { self.user = user; }

    /// Typed slots for middleware to pass data to later stages and handlers.
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("user", &self.user.as_ref().map(|u| &u.id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_context(method: &str, uri: &str, content_type: Option<&str>, body: &str) -> RequestContext {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    let req = builder
        .body(http_body_util::Full::new(Bytes::from(body.to_owned())))
        .expect("valid test request");
    RequestContext::new(req).expect("routable method")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_is_read_once_and_cached() {
        let mut ctx = test_context("POST", "/x", Some("text/plain"), "hello");
        assert_eq!(ctx.read_body().await.unwrap(), "hello");
        assert_eq!(ctx.read_body().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn bodies_over_the_limit_are_refused() {
        let req = http::Request::post("/x")
            .body(http_body_util::Limited::new(
                http_body_util::Full::new(Bytes::from(vec![b'x'; 64])),
                16,
            ))
            .unwrap();
        let mut ctx = RequestContext::new(req).unwrap();
        assert!(matches!(ctx.read_body().await, Err(Error::PayloadTooLarge)));
    }

    #[test]
    fn content_type_drops_parameters() {
        let ctx = test_context("POST", "/x", Some("Application/JSON; charset=utf-8"), "");
        assert_eq!(ctx.content_type().as_deref(), Some("application/json"));
        assert_eq!(test_context("POST", "/x", None, "").content_type(), None);
    }

    #[test]
    fn cookie_lookup_splits_pairs() {
        let req = http::Request::builder()
            .uri("/")
            .header("cookie", "a=1; awesession=abc-123-def")
            .body(http_body_util::Full::new(Bytes::new()))
            .unwrap();
        let ctx = RequestContext::new(req).unwrap();
        assert_eq!(ctx.cookie("awesession"), Some("abc-123-def"));
        assert_eq!(ctx.cookie("missing"), None);
    }

    #[test]
    fn empty_query_is_none() {
        assert_eq!(test_context("GET", "/x?", None, "").query_string(), None);
        assert_eq!(test_context("GET", "/x?a=1", None, "").query_string(), Some("a=1"));
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let req = http::Request::builder()
            .method("PURGE")
            .uri("/")
            .body(http_body_util::Full::new(Bytes::new()))
            .unwrap();
        assert!(RequestContext::new(req).is_err());
    }
}
