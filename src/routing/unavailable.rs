//! Blanket rejection of unregistered paths.
//!
//! Wraps a router and, while a response code is configured, answers every
//! request whose path matches none of the registered exact or prefix paths
//! with that code. Without a response code it is a pass-through.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::http::handler::{HttpHandler, SharedHandler};
use crate::http::response::status_response;
use crate::routing::matcher::PathMatcher;

pub struct HttpUnavailablePathHandler {
    next: SharedHandler,
    paths: ArcSwap<PathMatcher<()>>,
    /// 0 means no override.
    response_code: AtomicU16,
    lock: Mutex<()>,
}

impl HttpUnavailablePathHandler {
    pub fn new(next: SharedHandler) -> Self {
        Self {
            next,
            paths: ArcSwap::from_pointee(PathMatcher::new()),
            response_code: AtomicU16::new(0),
            lock: Mutex::new(()),
        }
    }

    /// Set or clear the status answered for unregistered paths.
    pub fn set_response_code(&self, code: Option<StatusCode>) {
        let _guard = self.lock.lock();
        let raw = code.map(|c| c.as_u16()).unwrap_or(0);
        self.response_code.store(raw, Ordering::Release);
        tracing::info!(response_code = raw, "Unavailable path response code updated");
    }

    pub fn response_code(&self) -> Option<StatusCode> {
        match self.response_code.load(Ordering::Acquire) {
            0 => None,
            raw => StatusCode::from_u16(raw).ok(),
        }
    }

    pub fn add_prefix_path(&self, path: &str) {
        self.update(|paths| {
            paths.add_prefix(path, ());
        });
    }

    pub fn add_exact_path(&self, path: &str) {
        self.update(|paths| {
            paths.add_exact(path, ());
        });
    }

    pub fn remove_prefix_path(&self, path: &str) {
        self.update(|paths| {
            paths.remove_prefix(path);
        });
    }

    pub fn remove_exact_path(&self, path: &str) {
        self.update(|paths| {
            paths.remove_exact(path);
        });
    }

    pub fn clear_paths(&self) {
        self.update(PathMatcher::clear);
    }

    /// True when the path matches a registered exact or prefix path.
    pub fn is_registered(&self, path: &str) -> bool {
        self.paths.load().match_path(path).is_some()
    }

    /// Distinct prefix lengths of the current snapshot, longest first.
    pub fn prefix_lengths(&self) -> Vec<usize> {
        self.paths.load().lengths().to_vec()
    }

    fn update(&self, f: impl FnOnce(&mut PathMatcher<()>)) {
        let _guard = self.lock.lock();
        let mut next = PathMatcher::clone(&self.paths.load());
        f(&mut next);
        self.paths.store(Arc::new(next));
    }
}

impl HttpHandler for HttpUnavailablePathHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if let Some(code) = self.response_code() {
            if !self.is_registered(req.uri().path()) {
                tracing::debug!(
                    path = %req.uri().path(),
                    status = code.as_u16(),
                    "Path unavailable"
                );
                return Box::pin(async move { status_response(code) });
            }
        }
        self.next.handle(req)
    }
}
