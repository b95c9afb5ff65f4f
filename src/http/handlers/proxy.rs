//! Reverse-proxy location handler.
//!
//! # Responsibilities
//! - Select a backend (round robin over healthy backends)
//! - Forward the request with hop-by-hop headers stripped
//! - Retry idempotent requests with jittered backoff
//! - Update passive health from upstream outcomes

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::uri::{Authority, Scheme};
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::http::handler::HttpHandler;
use crate::http::request::ConnectionInfo;
use crate::http::response::text_response;
use crate::load_balancer::backend::{Backend, BackendError};
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;
use crate::resilience::retries::{is_retryable, RetryPolicy};

/// Largest request body buffered for a retryable request.
const MAX_BUFFERED_BODY: usize = 1024 * 1024;

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection" | "keep-alive" | "proxy-connection" | "te" | "trailer" | "transfer-encoding" | "upgrade"
    )
}

#[derive(Debug, Clone)]
pub struct ReverseProxySettings {
    pub name: String,
    pub backends: Vec<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub max_connections_per_backend: usize,
    pub unhealthy_threshold: usize,
    pub healthy_threshold: usize,
}

impl ReverseProxySettings {
    pub fn new(name: impl Into<String>, backends: Vec<String>) -> Self {
        Self {
            name: name.into(),
            backends,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_millis(30_000),
            max_connections_per_backend: 100,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

pub struct ReverseProxyHandler {
    name: String,
    backends: Vec<Arc<Backend>>,
    balancer: RoundRobin,
    client: Client<HttpConnector, Body>,
    retry: RetryPolicy,
    request_timeout: Duration,
    unhealthy_threshold: usize,
    healthy_threshold: usize,
}

/// Request body for one or more attempts.
enum Payload {
    Buffered(Bytes),
    Once(Option<Body>),
}

impl Payload {
    fn for_attempt(&mut self) -> Body {
        match self {
            Payload::Buffered(bytes) => Body::from(bytes.clone()),
            Payload::Once(body) => body.take().unwrap_or_else(Body::empty),
        }
    }
}

enum Outcome {
    Response(Response),
    Network(String),
    Timeout,
}

impl ReverseProxyHandler {
    pub fn new(settings: ReverseProxySettings) -> Result<Self, BackendError> {
        let backends = settings
            .backends
            .iter()
            .map(|url| Backend::new(url, settings.max_connections_per_backend).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            name: settings.name,
            backends,
            balancer: RoundRobin::new(),
            client,
            retry: settings.retry,
            request_timeout: settings.request_timeout,
            unhealthy_threshold: settings.unhealthy_threshold,
            healthy_threshold: settings.healthy_threshold,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    fn upstream_request(&self, parts: &Parts, body: Body, authority: &Authority, peer: Option<IpAddr>) -> Option<Request<Body>> {
        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.scheme = Some(Scheme::HTTP);
        uri_parts.authority = Some(authority.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some("/".parse().ok()?);
        }
        let uri = Uri::from_parts(uri_parts).ok()?;

        let mut req = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(body)
            .ok()?;
        let headers = req.headers_mut();
        for (name, value) in parts.headers.iter() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Some(ip) = peer {
            let forwarded = match parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert("x-forwarded-for", value);
            }
        }
        Some(req)
    }

    async fn attempt(&self, req: Request<Body>) -> Outcome {
        match tokio::time::timeout(self.request_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => Outcome::Response(response.map(Body::new)),
            Ok(Err(e)) => Outcome::Network(e.to_string()),
            Err(_) => Outcome::Timeout,
        }
    }

    async fn forward(&self, req: Request<Body>) -> Response {
        let peer = req.extensions().get::<ConnectionInfo>().map(|c| c.peer_addr.ip());
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let max_attempts = self.retry.max_attempts(&method);

        let mut payload = if max_attempts > 1 {
            match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
                Ok(bytes) => Payload::Buffered(bytes),
                Err(e) => {
                    tracing::debug!(handler = %self.name, error = %e, "Request body not buffered");
                    return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
                }
            }
        } else {
            Payload::Once(Some(body))
        };

        let mut attempts = 0;
        loop {
            attempts += 1;

            let Some(backend) = self
                .balancer
                .next_server(&self.backends)
                .and_then(|backend| backend.try_create_guard())
            else {
                tracing::warn!(handler = %self.name, "No healthy backends");
                metrics::record_upstream(&self.name, "unavailable");
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "No healthy backends");
            };

            let Some(upstream) = self.upstream_request(&parts, payload.for_attempt(), &backend.authority, peer) else {
                return text_response(StatusCode::BAD_REQUEST, "Request cannot be forwarded");
            };

            tracing::debug!(
                handler = %self.name,
                backend = %backend.authority,
                method = %method,
                path = %parts.uri.path(),
                attempt = attempts,
                "Proxying request"
            );

            match self.attempt(upstream).await {
                Outcome::Response(response) => {
                    let status = response.status();
                    let upstream_failure = matches!(
                        status,
                        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
                    );
                    if upstream_failure {
                        backend.mark_failure(self.unhealthy_threshold);
                    } else {
                        backend.mark_success(self.healthy_threshold);
                    }
                    if attempts < max_attempts && is_retryable(&method, Some(status), false) {
                        tracing::info!(handler = %self.name, attempt = attempts, status = %status, "Retrying request");
                        metrics::record_upstream(&self.name, "retry");
                    } else {
                        metrics::record_upstream(&self.name, if upstream_failure { "upstream_error" } else { "ok" });
                        return response;
                    }
                }
                Outcome::Network(error) => {
                    tracing::error!(handler = %self.name, backend = %backend.authority, attempt = attempts, error = %error, "Upstream error");
                    backend.mark_failure(self.unhealthy_threshold);
                    if attempts < max_attempts && is_retryable(&method, None, true) {
                        metrics::record_upstream(&self.name, "retry");
                    } else {
                        metrics::record_upstream(&self.name, "network_error");
                        return text_response(StatusCode::BAD_GATEWAY, "Upstream request failed");
                    }
                }
                Outcome::Timeout => {
                    tracing::warn!(handler = %self.name, backend = %backend.authority, attempt = attempts, timeout = ?self.request_timeout, "Upstream timed out");
                    backend.mark_failure(self.unhealthy_threshold);
                    if attempts < max_attempts && is_retryable(&method, None, true) {
                        metrics::record_upstream(&self.name, "retry");
                    } else {
                        metrics::record_upstream(&self.name, "timeout");
                        return text_response(StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out");
                    }
                }
            }

            drop(backend);
            let delay = self.retry.delay(attempts);
            tracing::debug!(handler = %self.name, delay = ?delay, "Backing off");
            tokio::time::sleep(delay).await;
        }
    }
}

impl HttpHandler for ReverseProxyHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(self.forward(req))
    }
}
