//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server of a reverse-proxy location
//! - Track active connections and enforce the per-backend limit
//! - Track passive health, probing unhealthy backends after a pause

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::uri::Authority;
use parking_lot::Mutex;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Passive health of a backend, derived from request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// An unhealthy backend is selectable again this long after its last failure.
const RECHECK_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct HealthTracker {
    state: HealthState,
    failures: usize,
    successes: usize,
    unhealthy_since: Option<Instant>,
}

/// A single upstream server.
#[derive(Debug)]
pub struct Backend {
    /// Base URL as configured.
    pub base_url: Url,
    /// `host:port` the upstream request URI is rewritten to.
    pub authority: Authority,
    /// Concurrent requests allowed.
    pub max_connections: usize,
    in_flight: AtomicUsize,
    health: Mutex<HealthTracker>,
}

impl Backend {
    /// Parse an `http://host[:port]` base URL.
    pub fn new(url: &str, max_connections: usize) -> Result<Self, BackendError> {
        let invalid = |reason: &str| BackendError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let base_url = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        if base_url.scheme() != "http" {
            return Err(invalid("only http:// backends are supported"));
        }
        let host = base_url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = base_url.port_or_known_default().unwrap_or(80);
        let authority = match base_url.host() {
            Some(url::Host::Ipv6(addr)) => format!("[{addr}]:{port}"),
            _ => format!("{host}:{port}"),
        };
        let authority = Authority::try_from(authority.as_str()).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            base_url,
            authority,
            max_connections,
            in_flight: AtomicUsize::new(0),
            health: Mutex::new(HealthTracker {
                state: HealthState::Unknown,
                failures: 0,
                successes: 0,
                unhealthy_since: None,
            }),
        })
    }

    pub fn active_connections(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Reserve a request slot, or `None` at `max_connections`.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<BackendConnectionGuard> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()?;
        Some(BackendConnectionGuard {
            backend: Arc::clone(self),
        })
    }

    pub fn health(&self) -> HealthState {
        self.health.lock().state
    }

    /// Healthy or unknown, or unhealthy long enough to be tried again.
    pub fn is_healthy(&self) -> bool {
        let health = self.health.lock();
        match (health.state, health.unhealthy_since) {
            (HealthState::Unhealthy, Some(since)) => since.elapsed() >= RECHECK_AFTER,
            (HealthState::Unhealthy, None) => false,
            _ => true,
        }
    }

    /// Count a good response; `healthy_threshold` in a row make it healthy.
    pub fn mark_success(&self, healthy_threshold: usize) {
        let mut health = self.health.lock();
        health.failures = 0;
        match health.state {
            HealthState::Healthy => return,
            HealthState::Unhealthy => {
                health.state = HealthState::Unknown;
                health.unhealthy_since = None;
                tracing::info!(backend = %self.base_url, "Backend recheck succeeded");
            }
            HealthState::Unknown => {}
        }
        health.successes += 1;
        if health.successes >= healthy_threshold {
            health.state = HealthState::Healthy;
            health.successes = 0;
            tracing::info!(backend = %self.base_url, "Backend marked healthy");
        }
    }

    /// Count a failure; `unhealthy_threshold` in a row take the backend out.
    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        let mut health = self.health.lock();
        health.successes = 0;
        if health.state == HealthState::Unhealthy {
            health.unhealthy_since = Some(Instant::now());
            return;
        }
        health.failures += 1;
        if health.failures >= unhealthy_threshold {
            health.state = HealthState::Unhealthy;
            health.failures = 0;
            health.unhealthy_since = Some(Instant::now());
            tracing::warn!(backend = %self.base_url, threshold = unhealthy_threshold, "Backend marked unhealthy");
        }
    }
}

/// Holds one request slot on a backend until dropped.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
