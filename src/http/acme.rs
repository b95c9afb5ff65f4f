//! ACME HTTP-01 challenge passthrough.
//!
//! Tokens published into the process-wide [`AcmeChallengeStore`] are served
//! at `/.well-known/acme-challenge/<token>` by every host, ahead of the
//! access log and filters. Unknown tokens fall through to the host chain.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::http::handler::{HttpHandler, SharedHandler};
use crate::http::response::text_response;

pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Token → key authorization.
#[derive(Debug, Clone, Default)]
pub struct AcmeChallengeStore {
    inner: Arc<DashMap<String, String>>,
}

impl AcmeChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, token: impl Into<String>, key_authorization: impl Into<String>) {
        let token = token.into();
        tracing::info!(token = %token, "ACME challenge published");
        self.inner.insert(token, key_authorization.into());
    }

    pub fn withdraw(&self, token: &str) -> bool {
        self.inner.remove(token).is_some()
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.inner.get(token).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub struct AcmeChallengeHandler {
    store: AcmeChallengeStore,
    next: SharedHandler,
}

impl AcmeChallengeHandler {
    pub fn new(store: AcmeChallengeStore, next: SharedHandler) -> Self {
        Self { store, next }
    }
}

impl HttpHandler for AcmeChallengeHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if req.method() == Method::GET {
            if let Some(token) = req.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX) {
                if let Some(key_authorization) = self.store.get(token) {
                    tracing::debug!(token = %token, "Answering ACME challenge");
                    return Box::pin(async move { text_response(StatusCode::OK, key_authorization) });
                }
            }
        }
        self.next.handle(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use crate::http::response::status_response;

    #[tokio::test]
    async fn known_tokens_answered_unknown_pass_through() {
        let store = AcmeChallengeStore::new();
        store.publish("abc", "abc.thumbprint");
        let handler = AcmeChallengeHandler::new(
            store.clone(),
            handler_fn(|_req: Request<Body>| async { status_response(StatusCode::NOT_FOUND) }),
        );
        let get = |path: &str| Request::builder().uri(path).body(Body::empty()).unwrap();

        let res = handler.handle(get("/.well-known/acme-challenge/abc")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"abc.thumbprint");

        let res = handler.handle(get("/.well-known/acme-challenge/zzz")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        assert!(store.withdraw("abc"));
        let res = handler.handle(get("/.well-known/acme-challenge/abc")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
