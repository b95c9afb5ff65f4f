//! Fallback handler installed at a host's root path.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::handler::HttpHandler;
use crate::http::response::status_response;

/// Answers the host's default response code, or 503 while suspended.
pub struct DefaultResponseCodeHandler {
    code: StatusCode,
    suspended: AtomicBool,
}

impl DefaultResponseCodeHandler {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            suspended: AtomicBool::new(false),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

impl HttpHandler for DefaultResponseCodeHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        let status = if self.is_suspended() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            self.code
        };
        tracing::debug!(path = %req.uri().path(), status = status.as_u16(), "Default response");
        Box::pin(async move { status_response(status) })
    }
}
