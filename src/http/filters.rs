//! Host filters.
//!
//! # Responsibilities
//! - Describe a filter attached to a host (`FilterRef`: priority, predicate)
//! - Skip a filter for requests its predicate does not match
//! - Provide the built-in filters: response header, request limit, error
//!   page, gzip and rewrite
//!
//! # Design Decisions
//! - A filter is a [`HandlerWrapper`]; state that must outlive a chain
//!   rebuild (the request-limit semaphore) lives in the filter, not in the
//!   handler it produces
//! - Lower priority wraps further out, so it runs earlier

use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;
use tower::{Layer, ServiceExt};
use tower_http::compression::CompressionLayer;

use crate::http::handler::{HandlerWrapper, HttpHandler, SharedHandler};
use crate::http::response::status_response;
use crate::routing::matcher::normalize_slashes;

/// Request predicate attached to a filter reference.
///
/// Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct FilterPredicate {
    pub path_prefixes: Vec<String>,
    pub methods: Vec<Method>,
}

impl FilterPredicate {
    pub fn matches(&self, req: &Request<Body>) -> bool {
        let method_ok = self.methods.is_empty() || self.methods.contains(req.method());
        if !method_ok {
            return false;
        }
        if self.path_prefixes.is_empty() {
            return true;
        }
        let path = normalize_slashes(req.uri().path());
        self.path_prefixes.iter().any(|prefix| {
            let prefix = normalize_slashes(prefix);
            prefix == "/"
                || path == prefix
                || (path.starts_with(&prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.path_prefixes.is_empty() && self.methods.is_empty()
    }
}

/// A filter as attached to a host.
#[derive(Clone)]
pub struct FilterRef {
    pub name: String,
    pub priority: i32,
    pub predicate: Option<FilterPredicate>,
    pub filter: Arc<dyn HandlerWrapper>,
}

impl FilterRef {
    pub fn new(name: impl Into<String>, filter: Arc<dyn HandlerWrapper>) -> Self {
        Self {
            name: name.into(),
            priority: 1,
            predicate: None,
            filter,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_predicate(mut self, predicate: FilterPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Wrap `next`, routing around the filter when the predicate fails.
    pub fn apply(&self, next: SharedHandler) -> SharedHandler {
        let filtered = self.filter.wrap(Arc::clone(&next));
        match &self.predicate {
            Some(predicate) if !predicate.is_empty() => Arc::new(PredicatedHandler {
                predicate: predicate.clone(),
                filtered,
                next,
            }),
            _ => filtered,
        }
    }
}

impl std::fmt::Debug for FilterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRef")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("predicate", &self.predicate)
            .finish()
    }
}

pub struct PredicatedHandler {
    predicate: FilterPredicate,
    filtered: SharedHandler,
    next: SharedHandler,
}

impl HttpHandler for PredicatedHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if self.predicate.matches(&req) {
            self.filtered.handle(req)
        } else {
            self.next.handle(req)
        }
    }
}

// --- response-header ---

/// Adds a fixed header to every response.
pub struct ResponseHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl ResponseHeaderFilter {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl HandlerWrapper for ResponseHeaderFilter {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(ResponseHeaderHandler {
            name: self.name.clone(),
            value: self.value.clone(),
            next,
        })
    }
}

struct ResponseHeaderHandler {
    name: HeaderName,
    value: HeaderValue,
    next: SharedHandler,
}

impl HttpHandler for ResponseHeaderHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let mut response = self.next.handle(req).await;
            response
                .headers_mut()
                .insert(self.name.clone(), self.value.clone());
            response
        })
    }
}

// --- request-limit ---

/// Bounds concurrent requests, queueing up to `queue_size` more.
pub struct RequestLimitFilter {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    queue_size: usize,
    queued: Arc<AtomicUsize>,
}

impl RequestLimitFilter {
    pub fn new(max_concurrent: usize, queue_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_size,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl HandlerWrapper for RequestLimitFilter {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(RequestLimitHandler {
            permits: Arc::clone(&self.permits),
            queue_size: self.queue_size,
            queued: Arc::clone(&self.queued),
            next,
        })
    }
}

/// One slot of a shared waiter count, given back on drop so a cancelled
/// request does not keep it.
pub(crate) struct QueueSlot(Arc<AtomicUsize>);

impl QueueSlot {
    /// Take a slot, returning it with the count held before it.
    pub(crate) fn take(counter: &Arc<AtomicUsize>) -> (Self, usize) {
        let position = counter.fetch_add(1, Ordering::SeqCst);
        (Self(Arc::clone(counter)), position)
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RequestLimitHandler {
    permits: Arc<Semaphore>,
    queue_size: usize,
    queued: Arc<AtomicUsize>,
    next: SharedHandler,
}

impl HttpHandler for RequestLimitHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let (slot, position) = QueueSlot::take(&self.queued);
                    if position >= self.queue_size {
                        drop(slot);
                        tracing::debug!(queue_size = self.queue_size, "Request limit queue full");
                        return status_response(StatusCode::SERVICE_UNAVAILABLE);
                    }
                    let acquired = Arc::clone(&self.permits).acquire_owned().await;
                    drop(slot);
                    match acquired {
                        Ok(permit) => permit,
                        Err(_) => return status_response(StatusCode::SERVICE_UNAVAILABLE),
                    }
                }
            };
            let response = self.next.handle(req).await;
            drop(permit);
            response
        })
    }
}

// --- error-page ---

/// Replaces the body of responses carrying `code`.
pub struct ErrorPageFilter {
    code: StatusCode,
    body: Bytes,
    content_type: HeaderValue,
}

impl ErrorPageFilter {
    pub fn new(code: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            code,
            body: body.into(),
            content_type: HeaderValue::from_static("text/html; charset=utf-8"),
        }
    }

    /// Load the page once, when the filter is configured.
    pub fn from_file(code: StatusCode, path: &Path) -> std::io::Result<Self> {
        let body = std::fs::read(path)?;
        Ok(Self::new(code, body))
    }
}

impl HandlerWrapper for ErrorPageFilter {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(ErrorPageHandler {
            code: self.code,
            body: self.body.clone(),
            content_type: self.content_type.clone(),
            next,
        })
    }
}

struct ErrorPageHandler {
    code: StatusCode,
    body: Bytes,
    content_type: HeaderValue,
    next: SharedHandler,
}

impl HttpHandler for ErrorPageHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let response = self.next.handle(req).await;
            if response.status() != self.code {
                return response;
            }
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(header::CONTENT_TYPE, self.content_type.clone());
            Response::from_parts(parts, Body::from(self.body.clone()))
        })
    }
}

// --- gzip ---

/// Gzip-encodes responses for clients that accept it.
///
/// Small bodies, images and event streams are left alone.
#[derive(Debug, Clone, Default)]
pub struct GzipFilter;

impl GzipFilter {
    pub fn new() -> Self {
        Self
    }
}

impl HandlerWrapper for GzipFilter {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(GzipHandler { next })
    }
}

struct GzipHandler {
    next: SharedHandler,
}

impl HttpHandler for GzipHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        let next = Arc::clone(&self.next);
        let inner = tower::service_fn(move |req: Request<Body>| {
            let next = Arc::clone(&next);
            async move { Ok::<_, Infallible>(next.handle(req).await) }
        });
        let service = CompressionLayer::new().layer(inner);
        Box::pin(async move {
            match service.oneshot(req).await {
                Ok(response) => response.map(Body::new),
                Err(never) => match never {},
            }
        })
    }
}

// --- rewrite ---

/// Rewrites the request path to `target`, or redirects the client there.
///
/// `%U` in the target stands for the original request path. The query
/// string is carried over in both modes.
#[derive(Debug, Clone)]
pub struct RewriteFilter {
    target: String,
    redirect: bool,
}

impl RewriteFilter {
    pub fn new(target: impl Into<String>, redirect: bool) -> Self {
        Self {
            target: target.into(),
            redirect,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect
    }

    fn resolve(&self, uri: &Uri) -> String {
        let path = self.target.replace("%U", uri.path());
        match uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        }
    }
}

impl HandlerWrapper for RewriteFilter {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(RewriteHandler {
            filter: self.clone(),
            next,
        })
    }
}

struct RewriteHandler {
    filter: RewriteFilter,
    next: SharedHandler,
}

impl RewriteHandler {
    fn redirect(&self, location: &str) -> Response {
        match HeaderValue::try_from(location) {
            Ok(value) => {
                let mut response = status_response(StatusCode::FOUND);
                response.headers_mut().insert(header::LOCATION, value);
                response
            }
            Err(_) => {
                tracing::warn!(location = %location, "Rewrite produced an invalid Location");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl HttpHandler for RewriteHandler {
    fn handle(&self, mut req: Request<Body>) -> BoxFuture<'_, Response> {
        let target = self.filter.resolve(req.uri());
        if self.filter.redirect {
            return Box::pin(async move { self.redirect(&target) });
        }

        let mut parts = req.uri().clone().into_parts();
        let rewritten = PathAndQuery::try_from(target.as_str())
            .ok()
            .and_then(|path| {
                parts.path_and_query = Some(path);
                Uri::from_parts(parts).ok()
            });
        match rewritten {
            Some(uri) => {
                tracing::trace!(from = %req.uri(), to = %uri, "Request rewritten");
                *req.uri_mut() = uri;
                self.next.handle(req)
            }
            None => {
                tracing::warn!(rewrite_target = %target, "Rewrite produced an invalid path");
                Box::pin(async { status_response(StatusCode::INTERNAL_SERVER_ERROR) })
            }
        }
    }
}
