//! Startup gate.
//!
//! While the process is still starting, a host's chain is fronted by a gate
//! that either holds requests until [`GateHandlerWrapper::open`] is called
//! or answers them at once with a configured status. Opening is permanent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::http::filters::QueueSlot;
use crate::http::handler::{HandlerWrapper, HttpHandler, SharedHandler};
use crate::http::response::status_response;

pub struct GateHandlerWrapper {
    open: watch::Sender<bool>,
    /// `None` queues requests; `Some` answers them with this status.
    status: Option<StatusCode>,
    waiting: Arc<AtomicUsize>,
}

impl GateHandlerWrapper {
    pub fn new(status: Option<StatusCode>) -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open,
            status,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A gate that holds requests until opened.
    pub fn queueing() -> Self {
        Self::new(None)
    }

    /// A gate that answers `status` until opened.
    pub fn rejecting(status: StatusCode) -> Self {
        Self::new(Some(status))
    }

    /// Release held requests and let all future ones through.
    pub fn open(&self) {
        let was_open = self.open.send_replace(true);
        if !was_open {
            tracing::info!(
                released = self.waiting.load(Ordering::SeqCst),
                "Startup gate opened"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Requests currently held by the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

impl HandlerWrapper for GateHandlerWrapper {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(GateHandler {
            next,
            open: self.open.subscribe(),
            status: self.status,
            waiting: Arc::clone(&self.waiting),
        })
    }
}

struct GateHandler {
    next: SharedHandler,
    open: watch::Receiver<bool>,
    status: Option<StatusCode>,
    waiting: Arc<AtomicUsize>,
}

impl HttpHandler for GateHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if *self.open.borrow() {
            return self.next.handle(req);
        }
        if let Some(status) = self.status {
            return Box::pin(async move { status_response(status) });
        }
        let mut open = self.open.clone();
        Box::pin(async move {
            let (slot, _) = QueueSlot::take(&self.waiting);
            let released = open.wait_for(|is_open| *is_open).await.is_ok();
            drop(slot);
            if released {
                self.next.handle(req).await
            } else {
                // Gate dropped while closed: the host stopped.
                status_response(StatusCode::SERVICE_UNAVAILABLE)
            }
        })
    }
}
