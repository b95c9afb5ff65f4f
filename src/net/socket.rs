//! Socket bindings.
//!
//! # Responsibilities
//! - Hold the named interface/port pairs listeners refer to
//! - Record which listener currently holds each binding
//! - Create listening sockets with the configured socket options
//!
//! # Design Decisions
//! - Sockets are created through `socket2` so backlog, buffer sizes and
//!   address reuse are applied before `listen`, then handed to tokio

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

use crate::server::registry::RegistryError;

/// A named interface and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketBinding {
    pub name: String,
    pub interface: IpAddr,
    pub port: u16,
}

impl SocketBinding {
    pub fn new(name: impl Into<String>, interface: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            interface,
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }
}

/// A binding currently held by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSocket {
    pub listener: String,
    pub local_addr: SocketAddr,
}

#[derive(Debug, Default)]
pub struct SocketBindingRegistry {
    bindings: DashMap<String, SocketBinding>,
    bound: DashMap<String, BoundSocket>,
}

impl SocketBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(&self, binding: SocketBinding) -> Result<(), RegistryError> {
        if self.bindings.contains_key(&binding.name) {
            return Err(RegistryError::Duplicate {
                kind: "socket binding",
                name: binding.name,
            });
        }
        self.bindings.insert(binding.name.clone(), binding);
        Ok(())
    }

    pub fn remove_binding(&self, name: &str) -> Option<SocketBinding> {
        self.bound.remove(name);
        self.bindings.remove(name).map(|(_, b)| b)
    }

    pub fn binding(&self, name: &str) -> Result<SocketBinding, RegistryError> {
        self.bindings
            .get(name)
            .map(|b| b.value().clone())
            .ok_or_else(|| RegistryError::NotFound {
                kind: "socket binding",
                name: name.to_string(),
            })
    }

    /// Record that `listener` holds the binding.
    pub fn claim(&self, name: &str, listener: &str, local_addr: SocketAddr) -> Result<(), RegistryError> {
        if !self.bindings.contains_key(name) {
            return Err(RegistryError::NotFound {
                kind: "socket binding",
                name: name.to_string(),
            });
        }
        match self.bound.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) if existing.get().listener != listener => {
                Err(RegistryError::Duplicate {
                    kind: "bound socket",
                    name: name.to_string(),
                })
            }
            entry => {
                entry.insert(BoundSocket {
                    listener: listener.to_string(),
                    local_addr,
                });
                Ok(())
            }
        }
    }

    pub fn release(&self, name: &str) -> bool {
        self.bound.remove(name).is_some()
    }

    pub fn bound(&self, name: &str) -> Option<BoundSocket> {
        self.bound.get(name).map(|b| b.value().clone())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bound.contains_key(name)
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    pub fn clear(&self) {
        self.bound.clear();
        self.bindings.clear();
    }
}

/// Socket-level options applied before `listen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub tcp_backlog: u32,
    pub receive_buffer: Option<usize>,
    pub send_buffer: Option<usize>,
    pub tcp_keep_alive: bool,
    pub tcp_no_delay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            tcp_backlog: 10_000,
            receive_buffer: None,
            send_buffer: None,
            tcp_keep_alive: false,
            tcp_no_delay: true,
        }
    }
}

/// Create a non-blocking listening socket on `addr`.
pub fn bind_listener(addr: SocketAddr, options: &SocketOptions) -> std::io::Result<tokio::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let Some(size) = options.receive_buffer {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    if options.tcp_keep_alive {
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let backlog = i32::try_from(options.tcp_backlog).unwrap_or(i32::MAX);
    socket.listen(backlog)?;
    tokio::net::TcpListener::from_std(socket.into())
}
