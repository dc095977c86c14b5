//! The composed application: route table plus middleware chain.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{Full, Limited};
use tracing::{error, warn};

use crate::config::{Config, DEFAULT_MAX_BODY_SIZE};
use crate::error::{BoxError, Error};
use crate::identity::UserLookup;
use crate::middleware::{
    Authenticator, BodyParser, Middleware, Next, RequestLogger, ResponseNormalizer, normalize,
};
use crate::reply::Reply;
use crate::request::RequestContext;
use crate::response::Response;
use crate::router::Router;
use crate::session::SessionCodec;
use crate::template::TemplateRenderer;

/// A router wrapped in an ordered middleware chain.
///
/// Stages run in the order they were added: the first [`wrap`](App::wrap)
/// call is the outermost stage.
pub struct App {
    router: Router,
    stages: Vec<Arc<dyn Middleware>>,
    body_limit: usize,
}

impl App {
    pub fn new(router: Router) -> Self {
        Self { router, stages: Vec::new(), body_limit: body_limit(DEFAULT_MAX_BODY_SIZE) }
    }

    /// The standard chain: logging, body parsing, authentication, response
    /// normalization.
    pub fn standard(
        router: Router,
        config: &Config,
        users: Arc<dyn UserLookup>,
        templates: Arc<dyn TemplateRenderer>,
    ) -> Self {
        let codec = Arc::new(SessionCodec::new(&config.session));
        Self::new(router)
            .with_body_limit(body_limit(config.server.max_body_size))
            .wrap(RequestLogger)
            .wrap(BodyParser)
            .wrap(Authenticator::new(codec, users, &config.auth))
            .wrap(ResponseNormalizer::new(templates))
    }

    /// Appends a stage inside the ones already added.
    pub fn wrap(mut self, stage: impl Middleware) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Largest request body, in bytes, a stage or handler may read.
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs one request through the chain.
    ///
    /// Never fails: unroutable methods get `405`, bodies over the limit get
    /// `413`, other errors escaping a stage get a bare `500`.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let req = req.map(|body| Limited::new(body, self.body_limit));
        match RequestContext::new(req) {
            Ok(ctx) => self.handle_context(ctx).await.into_inner(),
            Err(method) => {
                warn!(%method, "unsupported method");
                Response::status(StatusCode::METHOD_NOT_ALLOWED).into_inner()
            }
        }
    }

    /// Runs an already-wrapped request through the chain.
    pub async fn handle_context(&self, ctx: RequestContext) -> Response {
        let (method, path) = (ctx.method(), ctx.path().to_owned());
        match Next::new(&self.stages, &self.router).run(ctx).await {
            Ok(Reply::Stream(response)) => response,
            // No normalizer in the chain: apply the template-less rules here.
            Ok(reply) => normalize(reply, None).render(None).unwrap_or_else(|e| {
                error!(%method, %path, error = %e, "response rendering failed");
                internal_error()
            }),
            Err(Error::PayloadTooLarge) => {
                warn!(%method, %path, limit = self.body_limit, "request body too large");
                Response::builder()
                    .status(StatusCode::PAYLOAD_TOO_LARGE)
                    .text("413 Payload Too Large")
            }
            Err(e) => {
                error!(%method, %path, error = %e, "request failed");
                internal_error()
            }
        }
    }
}

fn body_limit(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

fn internal_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .text("500 Internal Server Error")
}
