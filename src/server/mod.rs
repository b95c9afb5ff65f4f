//! Servers: a named set of listeners in front of a set of virtual hosts.
//!
//! # Data Flow
//! ```text
//! ListenerService (accepted request)
//!     → Server::root_handler (VirtualHostRouter)
//!     → Host::get_or_create_root_handler
//! ```

pub mod events;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::host::Host;
use crate::http::handler::SharedHandler;
use crate::routing::virtual_host::VirtualHostRouter;
use events::{EventBus, WebEvent};
use registry::RegistryError;

pub use events::EventListener;
pub use registry::Subsystem;

/// What a listener told its server when it registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRegistration {
    pub protocol: &'static str,
    pub secure: bool,
}

pub struct Server {
    name: String,
    events: Arc<EventBus>,
    hosts: DashMap<String, Arc<Host>>,
    listeners: DashMap<String, ListenerRegistration>,
    router: Arc<VirtualHostRouter>,
    started: AtomicBool,
}

impl Server {
    pub fn new(name: impl Into<String>, default_host: impl Into<String>, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            events,
            hosts: DashMap::new(),
            listeners: DashMap::new(),
            router: Arc::new(VirtualHostRouter::new(default_host)),
            started: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn default_host(&self) -> &str {
        self.router.default_host()
    }

    /// Entry point for every listener of this server.
    pub fn root_handler(&self) -> SharedHandler {
        self.router.clone()
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(server = %self.name, default_host = %self.default_host(), "Server started");
        self.events.fire(WebEvent::ServerStart {
            server: self.name.clone(),
        });
    }

    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(server = %self.name, "Server stopped");
        self.events.fire(WebEvent::ServerStop {
            server: self.name.clone(),
        });
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    // --- hosts ---

    pub fn register_host(&self, host: Arc<Host>) -> Result<(), RegistryError> {
        let name = host.name().to_string();
        if self.hosts.contains_key(&name) {
            return Err(RegistryError::Duplicate { kind: "host", name });
        }
        self.router.add_host(Arc::clone(&host));
        self.hosts.insert(name, host);
        Ok(())
    }

    pub fn unregister_host(&self, name: &str) -> Option<Arc<Host>> {
        let removed = self.hosts.remove(name).map(|(_, host)| host);
        if removed.is_some() {
            self.router.remove_host(name);
        }
        removed
    }

    pub fn host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.iter().map(|h| Arc::clone(h.value())).collect()
    }

    /// Host that would answer a request addressed to `name`.
    pub fn resolve_host(&self, name: &str) -> Option<Arc<Host>> {
        self.router.resolve(Some(name))
    }

    // --- listeners ---

    pub fn register_listener(&self, name: &str, registration: ListenerRegistration) {
        tracing::debug!(server = %self.name, listener = %name, "Listener registered");
        self.listeners.insert(name.to_string(), registration);
    }

    pub fn unregister_listener(&self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    pub fn listener_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.iter().map(|l| l.key().clone()).collect();
        names.sort();
        names
    }
}
