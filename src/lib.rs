//! # plinth
//!
//! A minimal web-application runtime: routes requests to async handlers
//! through an ordered middleware chain, binds handler arguments from the
//! request, turns whatever the handler returned into a response, and signs
//! session cookies.
//!
//! ## The pipeline
//!
//! ```text
//! request → RequestLogger → BodyParser → Authenticator → ResponseNormalizer
//!         → route lookup → argument binding → handler
//! ```
//!
//! - Each handler declares its parameters once, with [`Params`]. The router
//!   turns that into a [`HandlerDescriptor`] at registration; the binder
//!   consults it on every request.
//! - Handlers return `Result<impl Into<Reply>, Error>`. Text, `redirect:`
//!   text, JSON mappings, template mappings, status codes and
//!   `(code, message)` pairs are all valid replies.
//! - [`ApiError`]s become JSON error objects; any other error is a `500`.
//! - Session tokens are stateless and stop working as soon as the user's
//!   password changes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plinth::{App, Args, Config, Error, Params, Reply, Router, Server};
//! # use plinth::{BoxFuture, Identity, TemplateRenderer, UserLookup};
//! # struct Users;
//! # impl UserLookup for Users {
//! #     fn find_user<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>> {
//! #         Box::pin(async { Ok(None) })
//! #     }
//! # }
//! # struct Templates;
//! # impl TemplateRenderer for Templates {
//! #     fn render(&self, _: &str, _: &serde_json::Map<String, serde_json::Value>) -> Result<String, Error> {
//! #         Ok(String::new())
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = Config::from_layers("", None)?;
//!     let router = Router::new()
//!         .get("/api/blogs/{id}", Params::new().arg("id"), get_blog)
//!         .get("/api/blogs", Params::new().optional("page", "1"), list_blogs);
//!
//!     let app = App::standard(router, &config, Arc::new(Users), Arc::new(Templates));
//!     Server::from_config(&config.server)?.serve(app).await
//! }
//!
//! async fn get_blog(args: Args) -> Result<Reply, Error> {
//!     let id = args.text("id")?;
//!     Ok(Reply::from(serde_json::json!({ "id": id })))
//! }
//!
//! async fn list_blogs(args: Args) -> Result<Reply, Error> {
//!     let page = args.text("page")?;
//!     Ok(Reply::from(serde_json::json!({ "page": page, "blogs": [] })))
//! }
//! ```

mod app;
mod binder;
mod config;
mod descriptor;
mod error;
mod handler;
mod identity;
mod method;
mod reply;
mod request;
mod response;
mod router;
mod server;
mod template;

pub mod middleware;
pub mod session;

pub use app::App;
pub use binder::Args;
pub use config::{AuthConfig, Config, ServerConfig, SessionConfig};
pub use descriptor::{HandlerDescriptor, Param, ParamKind, Params};
pub use error::{ApiError, BoxError, Error};
pub use handler::{BoxFuture, Handler};
pub use identity::{Identity, REDACTED, UserLookup};
pub use method::Method;
pub use middleware::{Middleware, Next, ResponseVariant};
pub use reply::Reply;
pub use request::{BodyData, RequestContext};
pub use response::{ContentType, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use session::SessionCodec;
pub use template::TemplateRenderer;
