//! Request handler abstraction.
//!
//! Every node of a host's handler chain implements [`HttpHandler`]. A
//! [`HandlerWrapper`] takes the next handler and returns a new one, so a
//! chain is composed innermost first and read outermost first.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

/// A node that turns a request into a response.
///
/// Dispatch is expected to be cheap and non-blocking; anything slow belongs
/// inside the returned future.
pub trait HttpHandler: Send + Sync + 'static {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response>;
}

/// Handlers are shared between chain generations.
pub type SharedHandler = Arc<dyn HttpHandler>;

/// Builds a handler around the next one in the chain.
pub trait HandlerWrapper: Send + Sync {
    fn wrap(&self, next: SharedHandler) -> SharedHandler;
}

/// Adapts an async closure into an [`HttpHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HttpHandler for HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin((self.f)(req))
    }
}

/// Create a shared handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

/// Adapts a closure of `next` into a [`HandlerWrapper`].
pub struct WrapperFn<F> {
    f: F,
}

impl<F> HandlerWrapper for WrapperFn<F>
where
    F: Fn(SharedHandler) -> SharedHandler + Send + Sync,
{
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        (self.f)(next)
    }
}

pub fn wrapper_fn<F>(f: F) -> Arc<dyn HandlerWrapper>
where
    F: Fn(SharedHandler) -> SharedHandler + Send + Sync + 'static,
{
    Arc::new(WrapperFn { f })
}
