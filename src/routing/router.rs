//! Mutable path-prefix router.
//!
//! # Responsibilities
//! - Store prefix and exact path registrations
//! - Dispatch a request to the handler of its longest matching prefix
//! - Tell the target handler which prefix matched
//!
//! # Design Decisions
//! - Copy-on-write: writers clone the table under a mutex and publish it
//!   atomically, readers load the current snapshot without locking
//! - Explicit 404 when nothing matches and no root entry exists

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::http::handler::{HttpHandler, SharedHandler};
use crate::http::request::MatchedPath;
use crate::http::response::status_response;
use crate::routing::matcher::{normalize_slashes, PathMatcher};

/// Prefix router shared by a host's chain generations.
pub struct PathRouter {
    table: ArcSwap<PathMatcher<SharedHandler>>,
    write_lock: Mutex<()>,
}

impl PathRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(PathMatcher::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a router whose root path is answered by `default`.
    pub fn with_default(default: SharedHandler) -> Self {
        let router = Self::new();
        router.add_prefix_path("/", default);
        router
    }

    pub fn add_prefix_path(&self, path: &str, handler: SharedHandler) -> Option<SharedHandler> {
        self.update(|table| table.add_prefix(path, handler))
    }

    pub fn remove_prefix_path(&self, path: &str) -> Option<SharedHandler> {
        self.update(|table| table.remove_prefix(path))
    }

    pub fn add_exact_path(&self, path: &str, handler: SharedHandler) -> Option<SharedHandler> {
        self.update(|table| table.add_exact(path, handler))
    }

    pub fn remove_exact_path(&self, path: &str) -> Option<SharedHandler> {
        self.update(|table| table.remove_exact(path))
    }

    pub fn clear(&self) {
        self.update(|table| table.clear());
    }

    /// Handler registered for exactly this prefix.
    pub fn prefix_handler(&self, path: &str) -> Option<SharedHandler> {
        self.table.load().prefix(path).cloned()
    }

    pub fn prefix_paths(&self) -> Vec<String> {
        self.table.load().prefix_paths().map(str::to_string).collect()
    }

    /// Resolve a request path to its matched prefix and handler.
    pub fn resolve(&self, path: &str) -> Option<(MatchedPath, SharedHandler)> {
        let table = self.table.load();
        let found = table.match_path(path)?;
        let normalized = normalize_slashes(path);
        let relative = if found.matched == "/" {
            normalized
        } else {
            let rest = &normalized[found.matched.len()..];
            if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            }
        };
        Some((
            MatchedPath {
                prefix: found.matched.to_string(),
                relative,
            },
            found.value.clone(),
        ))
    }

    fn update<R>(&self, f: impl FnOnce(&mut PathMatcher<SharedHandler>) -> R) -> R {
        let _guard = self.write_lock.lock();
        let mut next = PathMatcher::clone(&self.table.load());
        let result = f(&mut next);
        self.table.store(Arc::new(next));
        result
    }
}

impl Default for PathRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHandler for PathRouter {
    fn handle(&self, mut req: Request<Body>) -> BoxFuture<'_, Response> {
        match self.resolve(req.uri().path()) {
            Some((matched, handler)) => {
                tracing::trace!(
                    path = %req.uri().path(),
                    prefix = %matched.prefix,
                    "Path matched"
                );
                req.extensions_mut().insert(matched);
                Box::pin(async move { handler.handle(req).await })
            }
            None => {
                tracing::debug!(path = %req.uri().path(), "No path matched");
                Box::pin(async { status_response(StatusCode::NOT_FOUND) })
            }
        }
    }
}
