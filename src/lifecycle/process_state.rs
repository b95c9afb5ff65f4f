//! Process state notification.
//!
//! The bootstrap moves the process through `Starting → Running → Stopping →
//! Stopped`; components that must react to a transition (the host startup
//! gate) register a [`ProcessStateListener`]. Listeners are called
//! synchronously, in registration order, and only when the state actually
//! changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Starting,
    Running,
    ReloadRequired,
    RestartRequired,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::ReloadRequired => "reload-required",
            ProcessState::RestartRequired => "restart-required",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub trait ProcessStateListener: Send + Sync {
    fn state_changed(&self, previous: ProcessState, current: ProcessState);
}

/// Handle returned by [`ProcessStateNotifier::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateListenerId(u64);

pub struct ProcessStateNotifier {
    state: Mutex<ProcessState>,
    listeners: Mutex<Vec<(StateListenerId, Arc<dyn ProcessStateListener>)>>,
    next_id: AtomicU64,
}

impl ProcessStateNotifier {
    pub fn new(initial: ProcessState) -> Self {
        Self {
            state: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> ProcessState {
        *self.state.lock()
    }

    /// Move to `next`, notifying listeners if the state changed.
    pub fn set_state(&self, next: ProcessState) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == next {
                return;
            }
            *state = next;
            previous
        };
        tracing::info!(from = %previous, to = %next, "Process state changed");

        // Snapshot so listeners may deregister themselves while being called.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.state_changed(previous, next);
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ProcessStateListener>) -> StateListenerId {
        let id = StateListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: StateListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for ProcessStateNotifier {
    fn default() -> Self {
        Self::new(ProcessState::Starting)
    }
}
