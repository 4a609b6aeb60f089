//! Route handlers and their type erasure.
//!
//! The router keeps handlers of different concrete types side by side in one
//! `matchit` tree per method, so each handler is hidden behind the
//! [`ErasedHandler`] trait object:
//!
//! ```text
//! async fn origin(req: Request) -> Response { … }
//!        ↓ router.on_all("/", origin)
//! origin.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(origin))                      ← stored as BoxedHandler
//!        ↓ at request time
//! Box::pin(async { origin(req).await.into_response() })
//! ```
//!
//! `on_all` registers the same `Arc` under every method, so one handler
//! serves them all. Per request the cost is one `Arc` clone and one virtual
//! call, which the middleware chain's own boxing already dwarfs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A boxed future resolving to a [`Response`]. `Send + 'static` so hyper can
/// drive it on any worker thread.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of [`Handler::into_boxed_handler`].
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every `Fn(Request) -> impl Future<Output = impl IntoResponse>`,
/// including plain `async fn` items and closures returning `async` blocks
/// (see [`TestServer::into_handler`](crate::origin::TestServer::into_handler)).
///
/// Sealed through a private supertrait, so external crates cannot implement
/// it for their own types and the blanket impl stays the only one.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
