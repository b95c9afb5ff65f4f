//! Resilience helpers for upstream requests.
//!
//! # Data Flow
//! ```text
//! Reverse proxy attempt fails:
//!     → retries.rs (is the method/outcome retryable, attempts left?)
//!     → backoff.rs (jittered exponential delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retries;
