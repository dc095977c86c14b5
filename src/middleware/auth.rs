use std::sync::Arc;

use tracing::{debug, info};

use super::{Middleware, Next};
use crate::config::AuthConfig;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::identity::UserLookup;
use crate::reply::Reply;
use crate::request::RequestContext;
use crate::response::Response;
use crate::session::{SessionCodec, unix_now};

/// Resolves the session cookie into the current user and guards the
/// administrative prefix.
///
/// A missing, malformed, expired or forged cookie just means "anonymous".
/// Requests under the admin prefix without an admin user are redirected to
/// the sign-in page and never reach a handler.
pub struct Authenticator {
    codec: Arc<SessionCodec>,
    users: Arc<dyn UserLookup>,
    admin_prefix: String,
    signin_path: String,
}

impl Authenticator {
    pub fn new(codec: Arc<SessionCodec>, users: Arc<dyn UserLookup>, config: &AuthConfig) -> Self {
        Self {
            codec,
            users,
            admin_prefix: config.admin_prefix.clone(),
            signin_path: config.signin_path.clone(),
        }
    }
}

impl Middleware for Authenticator {
    fn call<'a>(&'a self, mut ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            debug!(method = %ctx.method(), path = ctx.path(), "check user");
            ctx.set_user(None);

            if let Some(token) = ctx.cookie(self.codec.cookie_name()).map(str::to_owned) {
                if let Some(user) = self.codec.decode(&token, self.users.as_ref(), unix_now()).await {
                    info!(user = %user.email, "set current user");
                    ctx.set_user(Some(user));
                }
            }

            let is_admin = ctx.user().is_some_and(|u| u.admin);
            if ctx.path().starts_with(&self.admin_prefix) && !is_admin {
                return Ok(Reply::Stream(Response::redirect(&self.signin_path)));
            }
            next.run(ctx).await
        })
    }
}
