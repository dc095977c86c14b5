use tracing::info;

use super::{Middleware, Next};
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::reply::Reply;
use crate::request::RequestContext;

/// Logs every request line, then delegates.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn call<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            info!(method = %ctx.method(), path = ctx.path(), "request");
            next.run(ctx).await
        })
    }
}
