//! Load balancing for the reverse-proxy location handler.
//!
//! # Data Flow
//! ```text
//! ReverseProxyHandler
//!     → round_robin.rs (rotate through healthy backends)
//!     → backend.rs (acquire connection guard, passive health)
//!     → forward or answer 503
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless apart from its cursor; backends track
//!   connections and health
//! - Unhealthy backends excluded from selection

pub mod backend;
pub mod round_robin;

use std::sync::Arc;

use crate::load_balancer::backend::Backend;

/// Picks the backend for the next request.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
