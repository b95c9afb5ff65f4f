//! HTTP handling subsystem.
//!
//! # Data Flow
//! ```text
//! listener open listener
//!     → server virtual-host router
//!     → host chain: gate → acme.rs → access_log.rs → filters.rs
//!       → options.rs → expect.rs → availability → path router
//!     → handlers/ (file, reverse proxy) or an embedder's handler
//! ```

pub mod access_log;
pub mod acme;
pub mod expect;
pub mod filters;
pub mod handler;
pub mod handlers;
pub mod options;
pub mod request;
pub mod response;

pub use handler::{handler_fn, wrapper_fn, HandlerWrapper, HttpHandler, SharedHandler};
pub use request::{ConnectionInfo, MatchedPath};
