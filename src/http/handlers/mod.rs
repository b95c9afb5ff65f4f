//! Built-in location handlers.
//!
//! - `file`: static content below a directory
//! - `proxy`: reverse proxy to a set of HTTP backends

pub mod file;
pub mod proxy;

pub use file::FileHandler;
pub use proxy::{ReverseProxyHandler, ReverseProxySettings};
