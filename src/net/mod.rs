//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! socket.rs (binding registry, socket2 bind)
//!     → listener.rs (accept loop, connection limits, open listener)
//!     → proxy_protocol.rs (optional PROXY header)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (hyper auto HTTP/1 + HTTP/2 connection)
//!     → server root handler (virtual-host router)
//! ```

pub mod connection;
pub mod listener;
pub mod proxy_protocol;
pub mod resources;
pub mod socket;
pub mod tls;

pub use listener::{
    ListenerDependencies, ListenerError, ListenerOptions, ListenerProtocol, ListenerService, ListenerSettings,
    ListenerState, ListenerStatistics, OpenListener, StatisticsSnapshot, TlsSettings,
};
pub use resources::{BufferPool, Worker};
pub use socket::{SocketBinding, SocketBindingRegistry, SocketOptions};
