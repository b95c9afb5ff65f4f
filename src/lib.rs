//! Virtual-host web subsystem.
//!
//! Servers own named virtual hosts; listeners bind socket bindings and hand
//! every request to their server's root handler, which resolves the host
//! and runs that host's cached handler chain.

pub mod config;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod server;

pub use config::schema::WebConfig;
pub use host::{Host, HostSettings};
pub use lifecycle::{Bootstrap, Shutdown};
pub use net::listener::ListenerService;
pub use server::registry::{Subsystem, SubsystemSettings};
pub use server::Server;
