//! `OPTIONS *` short-circuit.
//!
//! A server-wide `OPTIONS *` request is answered here with the supported
//! methods; it never reaches the path router.

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::handler::{HttpHandler, SharedHandler};
use crate::http::response::status_response;

const ALLOWED: &str = "GET, HEAD, POST, PUT, DELETE, PATCH, OPTIONS";

pub struct OptionsHandler {
    next: SharedHandler,
}

impl OptionsHandler {
    pub fn new(next: SharedHandler) -> Self {
        Self { next }
    }
}

impl HttpHandler for OptionsHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if req.method() == Method::OPTIONS && req.uri().path() == "*" {
            return Box::pin(async {
                let mut response = status_response(StatusCode::OK);
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOWED));
                response
            });
        }
        self.next.handle(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    fn handler() -> OptionsHandler {
        OptionsHandler::new(handler_fn(|_req: Request<Body>| async {
            status_response(StatusCode::NOT_FOUND)
        }))
    }

    #[tokio::test]
    async fn asterisk_options_answered_directly() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("*")
            .body(Body::empty())
            .unwrap();
        let res = handler().handle(req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers()[header::ALLOW].to_str().unwrap().contains("GET"));
    }

    #[tokio::test]
    async fn path_options_pass_through() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/app")
            .body(Body::empty())
            .unwrap();
        assert_eq!(handler().handle(req).await.status(), StatusCode::NOT_FOUND);
    }
}
