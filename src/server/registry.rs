//! Process-wide web subsystem registry.
//!
//! Holds what every server, host and listener of the process shares:
//! the servers themselves, socket bindings, lifecycle collaborators, the
//! statistics toggle and per-listener statistics, the ACME challenge store
//! and known security domains. Passed around explicitly as `Arc<Subsystem>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::http::acme::AcmeChallengeStore;
use crate::lifecycle::process_state::ProcessStateNotifier;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::suspend::SuspendController;
use crate::net::listener::{ListenerStatistics, StatisticsSnapshot};
use crate::net::socket::SocketBindingRegistry;
use crate::server::events::{EventBus, WebEvent};
use crate::server::Server;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} '{name}' already registered")]
    Duplicate { kind: &'static str, name: String },
}

#[derive(Debug, Clone)]
pub struct SubsystemSettings {
    pub default_server: String,
    pub default_virtual_host: String,
    pub statistics_enabled: bool,
    pub instance_id: String,
}

impl Default for SubsystemSettings {
    fn default() -> Self {
        Self {
            default_server: "default-server".to_string(),
            default_virtual_host: "default-host".to_string(),
            statistics_enabled: false,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

pub struct Subsystem {
    settings: SubsystemSettings,
    servers: DashMap<String, Arc<Server>>,
    socket_bindings: Arc<SocketBindingRegistry>,
    events: Arc<EventBus>,
    process_state: Arc<ProcessStateNotifier>,
    suspend: Arc<SuspendController>,
    shutdown: Arc<Shutdown>,
    acme: AcmeChallengeStore,
    statistics_enabled: Arc<AtomicBool>,
    statistics: DashMap<String, Arc<ListenerStatistics>>,
    security_domains: DashSet<String>,
}

impl Subsystem {
    pub fn new(settings: SubsystemSettings) -> Arc<Self> {
        Arc::new(Self {
            statistics_enabled: Arc::new(AtomicBool::new(settings.statistics_enabled)),
            settings,
            servers: DashMap::new(),
            socket_bindings: Arc::new(SocketBindingRegistry::new()),
            events: Arc::new(EventBus::new()),
            process_state: Arc::new(ProcessStateNotifier::default()),
            suspend: Arc::new(SuspendController::new()),
            shutdown: Arc::new(Shutdown::new()),
            acme: AcmeChallengeStore::new(),
            statistics: DashMap::new(),
            security_domains: DashSet::new(),
        })
    }

    pub fn settings(&self) -> &SubsystemSettings {
        &self.settings
    }

    pub fn instance_id(&self) -> &str {
        &self.settings.instance_id
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn socket_bindings(&self) -> &Arc<SocketBindingRegistry> {
        &self.socket_bindings
    }

    pub fn process_state(&self) -> &Arc<ProcessStateNotifier> {
        &self.process_state
    }

    pub fn suspend_controller(&self) -> &Arc<SuspendController> {
        &self.suspend
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    pub fn acme(&self) -> &AcmeChallengeStore {
        &self.acme
    }

    // --- servers ---

    pub fn register_server(&self, server: Arc<Server>) -> Result<(), RegistryError> {
        let name = server.name().to_string();
        if self.servers.contains_key(&name) {
            return Err(RegistryError::Duplicate { kind: "server", name });
        }
        self.servers.insert(name, server);
        Ok(())
    }

    pub fn unregister_server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers.remove(name).map(|(_, server)| server)
    }

    pub fn server(&self, name: &str) -> Result<Arc<Server>, RegistryError> {
        self.servers
            .get(name)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| RegistryError::NotFound {
                kind: "server",
                name: name.to_string(),
            })
    }

    pub fn default_server(&self) -> Result<Arc<Server>, RegistryError> {
        self.server(&self.settings.default_server)
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    // --- statistics ---

    /// Shared toggle read by every listener on each request.
    pub fn statistics_toggle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.statistics_enabled)
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.statistics_enabled.store(enabled, Ordering::Release);
        tracing::info!(enabled, "Statistics toggled");
    }

    pub fn statistics_enabled(&self) -> bool {
        self.statistics_enabled.load(Ordering::Acquire)
    }

    pub fn register_statistics(&self, listener: &str, statistics: Arc<ListenerStatistics>) {
        self.statistics.insert(listener.to_string(), statistics);
    }

    pub fn unregister_statistics(&self, listener: &str) -> bool {
        self.statistics.remove(listener).is_some()
    }

    pub fn statistics(&self, listener: &str) -> Option<StatisticsSnapshot> {
        self.statistics.get(listener).map(|s| s.snapshot())
    }

    pub fn has_statistics(&self, listener: &str) -> bool {
        self.statistics.contains_key(listener)
    }

    // --- security domains ---

    pub fn register_security_domain(&self, name: impl Into<String>) -> bool {
        self.security_domains.insert(name.into())
    }

    pub fn unregister_security_domain(&self, name: &str) -> bool {
        self.security_domains.remove(name).is_some()
    }

    pub fn is_known_security_domain(&self, name: &str) -> bool {
        self.security_domains.contains(name)
    }

    /// Forget everything registered; used when the subsystem stops.
    pub fn clear(&self) {
        self.events.fire(WebEvent::Shutdown);
        self.servers.clear();
        self.statistics.clear();
        self.security_domains.clear();
        self.socket_bindings.clear();
        self.events.clear();
        tracing::info!("Web subsystem registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servers_are_unique() {
        let subsystem = Subsystem::new(SubsystemSettings::default());
        let server = Server::new("default-server", "default-host", subsystem.events());
        subsystem.register_server(server.clone()).unwrap();
        assert_eq!(
            subsystem.register_server(server),
            Err(RegistryError::Duplicate {
                kind: "server",
                name: "default-server".into()
            })
        );
        assert!(subsystem.default_server().is_ok());
        assert!(matches!(
            subsystem.server("missing"),
            Err(RegistryError::NotFound { kind: "server", .. })
        ));
    }

    #[test]
    fn clear_forgets_registrations() {
        let subsystem = Subsystem::new(SubsystemSettings::default());
        subsystem
            .register_server(Server::new("s", "h", subsystem.events()))
            .unwrap();
        assert!(subsystem.register_security_domain("other"));
        assert!(!subsystem.register_security_domain("other"));
        subsystem.register_statistics("default", Arc::new(ListenerStatistics::default()));

        subsystem.clear();
        assert!(subsystem.server_names().is_empty());
        assert!(!subsystem.is_known_security_domain("other"));
        assert!(!subsystem.has_statistics("default"));
    }

    #[test]
    fn instance_id_generated() {
        let a = SubsystemSettings::default();
        let b = SubsystemSettings::default();
        assert_ne!(a.instance_id, b.instance_id);
    }
}
