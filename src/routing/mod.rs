//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → virtual_host.rs (host header → Host, default host fallback)
//!     → host root chain (filters, gate, ...)
//!     → unavailable.rs (reject unregistered paths when configured)
//!     → router.rs (longest registered prefix → handler)
//!     → matcher.rs (slash-aligned prefix and exact lookup)
//! ```
//!
//! # Design Decisions
//! - Tables are copy-on-write snapshots; dispatch never takes a lock
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same handler
//! - Exact paths win over prefixes, longer prefixes over shorter

pub mod matcher;
pub mod router;
pub mod unavailable;
pub mod virtual_host;

pub use router::PathRouter;
pub use unavailable::HttpUnavailablePathHandler;
pub use virtual_host::VirtualHostRouter;
