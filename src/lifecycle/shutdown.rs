//! Container shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::http::handler::{HandlerWrapper, HttpHandler, SharedHandler};
use crate::http::response::status_response;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe
/// to, plus a flag checked on every request by the listeners' shutdown guard.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Only the first call broadcasts.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Container shutdown started");
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener wrapper answering 503 once shutdown has started.
pub struct ShutdownGuardWrapper {
    shutdown: Arc<Shutdown>,
}

impl ShutdownGuardWrapper {
    pub fn new(shutdown: Arc<Shutdown>) -> Self {
        Self { shutdown }
    }
}

impl HandlerWrapper for ShutdownGuardWrapper {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(ShutdownGuard {
            shutdown: Arc::clone(&self.shutdown),
            next,
        })
    }
}

struct ShutdownGuard {
    shutdown: Arc<Shutdown>,
    next: SharedHandler,
}

impl HttpHandler for ShutdownGuard {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if self.shutdown.is_triggered() {
            return Box::pin(async { status_response(StatusCode::SERVICE_UNAVAILABLE) });
        }
        self.next.handle(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    #[tokio::test]
    async fn guard_rejects_after_trigger() {
        let shutdown = Arc::new(Shutdown::new());
        let guard = ShutdownGuardWrapper::new(shutdown.clone()).wrap(handler_fn(
            |_req: Request<Body>| async { status_response(StatusCode::OK) },
        ));
        let req = || Request::builder().uri("/").body(Body::empty()).unwrap();

        assert_eq!(guard.handle(req()).await.status(), StatusCode::OK);
        shutdown.trigger();
        assert_eq!(guard.handle(req()).await.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn trigger_broadcasts_once() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.trigger();
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
        assert!(shutdown.is_triggered());
    }
}
