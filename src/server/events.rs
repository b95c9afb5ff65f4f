//! Lifecycle event fan-out.
//!
//! Events are delivered synchronously, in listener registration order, on
//! the thread that fired them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebEvent {
    ServerStart { server: String },
    ServerStop { server: String },
    HostStart { server: String, host: String },
    HostStop { server: String, host: String },
    DeploymentStart { server: String, host: String, deployment: String, context_path: String },
    DeploymentStop { server: String, host: String, deployment: String, context_path: String },
    Shutdown,
}

impl WebEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WebEvent::ServerStart { .. } => "server-start",
            WebEvent::ServerStop { .. } => "server-stop",
            WebEvent::HostStart { .. } => "host-start",
            WebEvent::HostStop { .. } => "host-stop",
            WebEvent::DeploymentStart { .. } => "deployment-start",
            WebEvent::DeploymentStop { .. } => "deployment-stop",
            WebEvent::Shutdown => "shutdown",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &WebEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventListenerId(u64);

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(EventListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> EventListenerId {
        let id = EventListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: EventListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn fire(&self, event: WebEvent) {
        tracing::debug!(event = event.kind(), "Dispatching lifecycle event");
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

/// Listener that records every event, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingListener {
    events: parking_lot::Mutex<Vec<WebEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<WebEvent> {
        self.events.lock().clone()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &WebEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(&'static str, Arc<parking_lot::Mutex<Vec<&'static str>>>);

    impl EventListener for Tagged {
        fn on_event(&self, _event: &WebEvent) {
            self.1.lock().push(self.0);
        }
    }

    #[test]
    fn delivered_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let bus = EventBus::new();
        bus.subscribe(Arc::new(Tagged("first", order.clone())));
        let second = bus.subscribe(Arc::new(Tagged("second", order.clone())));
        bus.subscribe(Arc::new(Tagged("third", order.clone())));

        bus.fire(WebEvent::Shutdown);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);

        assert!(bus.unsubscribe(second));
        bus.fire(WebEvent::Shutdown);
        assert_eq!(order.lock().len(), 5);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn recording_listener_keeps_payloads() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingListener::default());
        bus.subscribe(recorder.clone());
        bus.fire(WebEvent::ServerStart { server: "s".into() });
        assert_eq!(recorder.events(), vec![WebEvent::ServerStart { server: "s".into() }]);
    }
}
