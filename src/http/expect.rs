//! `Expect` header handling.
//!
//! The protocol engine sends `100 Continue` itself the first time a handler
//! polls a request body that announced `Expect: 100-continue`. This handler
//! only rejects expectations it cannot meet with `417 Expectation Failed`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::handler::{HttpHandler, SharedHandler};
use crate::http::response::status_response;

pub struct ExpectHandler {
    next: SharedHandler,
}

impl ExpectHandler {
    pub fn new(next: SharedHandler) -> Self {
        Self { next }
    }
}

impl HttpHandler for ExpectHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        let unsupported = req
            .headers()
            .get_all(header::EXPECT)
            .iter()
            .any(|value| {
                !value
                    .to_str()
                    .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
                    .unwrap_or(false)
            });
        if unsupported {
            tracing::debug!(path = %req.uri().path(), "Unsupported Expect header");
            return Box::pin(async { status_response(StatusCode::EXPECTATION_FAILED) });
        }
        self.next.handle(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    fn handler() -> ExpectHandler {
        ExpectHandler::new(handler_fn(|_req: Request<Body>| async {
            status_response(StatusCode::OK)
        }))
    }

    fn with_expect(value: &str) -> Request<Body> {
        Request::builder()
            .uri("/upload")
            .header(header::EXPECT, value)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn continue_expectation_passes() {
        assert_eq!(handler().handle(with_expect("100-Continue")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_expectation_fails() {
        assert_eq!(
            handler().handle(with_expect("200-ok")).await.status(),
            StatusCode::EXPECTATION_FAILED
        );
    }
}
