//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Rotates through backends, skipping unhealthy ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        // One full lap at most when every backend is unhealthy
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        (0..backends.len())
            .map(|i| &backends[(start + i) % backends.len()])
            .find(|backend| backend.is_healthy())
            .cloned()
    }
}
