//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The route table holds handlers of *different* types side by side, so each
//! one is erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn get_blog(args: Args) -> Result<Reply, Error> { … }   ← user writes this
//!        ↓ router.get("/blog/{id}", Params::new().arg("id"), get_blog)
//! get_blog.into_boxed_handler()                                ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_blog))                                ← stored next to its descriptor
//!        ↓
//! handler.call(args)  at request time                          ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_blog(args).await.map(Into::into) })     ← BoxFuture
//! ```
//!
//! The handler never sees the raw request: the binder assembles an [`Args`]
//! from the descriptor built at registration time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::binder::Args;
use crate::error::Error;
use crate::reply::Reply;

/// A heap-allocated, type-erased, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, args: Args) -> BoxFuture<'static, Result<Reply, Error>>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Automatically satisfied for any `async fn` with the signature:
///
/// ```text
/// async fn name(args: Args) -> Result<impl Into<Reply>, Error>
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    fn call(&self, args: Args) -> BoxFuture<'static, Result<Reply, Error>> {
        let fut = (self.0)(args);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}
