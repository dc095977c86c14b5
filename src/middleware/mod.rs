//! Middleware chain.
//!
//! A stage receives the request context and a [`Next`] continuation. It may
//! change the context and delegate, answer on its own without delegating, or
//! delegate and post-process the result. Stages registered as
//! `[S1, S2, ..., Sn]` run as `S1(S2(...Sn(dispatch)...))`, where `dispatch`
//! is the route lookup followed by argument binding and the handler call.
//!
//! The standard chain, in order:
//!
//! | Stage | Job |
//! |---|---|
//! | [`RequestLogger`] | log method and path |
//! | [`BodyParser`] | parse JSON / form bodies of `POST` requests |
//! | [`Authenticator`] | resolve the session cookie, guard the admin prefix |
//! | [`ResponseNormalizer`] | turn the handler's [`Reply`] into a response |
//!
//! An `Err` from any stage aborts the chain; the application answers with a
//! bare `500`.

pub(crate) mod body;

mod auth;
mod logger;
mod normalize;

use std::sync::Arc;

use crate::error::Error;
use crate::handler::BoxFuture;
use crate::reply::Reply;
use crate::request::RequestContext;
use crate::router::Router;

pub use auth::Authenticator;
pub use body::BodyParser;
pub use logger::RequestLogger;
pub use normalize::{REDIRECT_PREFIX, ResponseNormalizer, ResponseVariant, TEMPLATE_KEY, USER_KEY, normalize};

/// One stage of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>>;
}

/// The rest of the chain, as seen from one stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    router: &'a Router,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Middleware>], router: &'a Router) -> Self {
        Self { stages, router }
    }

    /// Runs the remaining stages and, after them, the matched handler.
    pub fn run(self, ctx: RequestContext) -> BoxFuture<'a, Result<Reply, Error>> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.call(ctx, Next { stages: rest, router: self.router }),
            None => Box::pin(self.router.dispatch(ctx)),
        }
    }
}
