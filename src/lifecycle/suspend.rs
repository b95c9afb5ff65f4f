//! Graceful suspend coordination.
//!
//! # Phases
//! ```text
//! Running → PreSuspend (activities stop taking new work)
//!         → Suspending (activities finish in-flight work)
//!         → Suspended
//! resume(): any phase → Running
//! ```
//!
//! Each registered [`ServerActivity`] receives an [`ActivityCompletion`] per
//! phase and signals it when done. The controller waits for all of them,
//! bounded by the caller's timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    Running,
    PreSuspend,
    Suspending,
    Suspended,
}

/// Completion callback for one activity in one phase.
///
/// Dropping it without calling [`ActivityCompletion::done`] also counts as
/// done.
#[derive(Debug)]
pub struct ActivityCompletion {
    tx: Option<oneshot::Sender<()>>,
}

impl ActivityCompletion {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn done(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

pub trait ServerActivity: Send + Sync {
    /// Stop accepting new work.
    fn pre_suspend(&self, done: ActivityCompletion);
    /// Finish in-flight work.
    fn suspended(&self, done: ActivityCompletion);
    fn resume(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(u64);

pub struct SuspendController {
    state: Mutex<SuspendState>,
    activities: Mutex<Vec<(ActivityId, Arc<dyn ServerActivity>)>>,
    next_id: AtomicU64,
}

impl SuspendController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SuspendState::Running),
            activities: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> SuspendState {
        *self.state.lock()
    }

    pub fn register_activity(&self, activity: Arc<dyn ServerActivity>) -> ActivityId {
        let id = ActivityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.activities.lock().push((id, activity));
        id
    }

    pub fn unregister_activity(&self, id: ActivityId) -> bool {
        let mut activities = self.activities.lock();
        let before = activities.len();
        activities.retain(|(existing, _)| *existing != id);
        activities.len() != before
    }

    pub fn activity_count(&self) -> usize {
        self.activities.lock().len()
    }

    /// Suspend all activities. Returns `false` if they did not all complete
    /// within `timeout`; the controller is `Suspended` either way.
    pub async fn suspend(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        self.set_state(SuspendState::PreSuspend);
        let pre = self.run_phase(|activity, done| activity.pre_suspend(done));
        let pre_done = tokio::time::timeout_at(deadline, pre).await.is_ok();

        self.set_state(SuspendState::Suspending);
        let suspending = self.run_phase(|activity, done| activity.suspended(done));
        let all_done = pre_done && tokio::time::timeout_at(deadline, suspending).await.is_ok();

        self.set_state(SuspendState::Suspended);
        if !all_done {
            tracing::warn!(timeout = ?timeout, "Suspend timed out before all activities completed");
        }
        all_done
    }

    pub fn resume(&self) {
        self.set_state(SuspendState::Running);
        for activity in self.snapshot() {
            activity.resume();
        }
    }

    fn run_phase(
        &self,
        call: impl Fn(&dyn ServerActivity, ActivityCompletion),
    ) -> impl std::future::Future<Output = ()> {
        let mut waits = Vec::new();
        for activity in self.snapshot() {
            let (done, rx) = ActivityCompletion::new();
            call(activity.as_ref(), done);
            waits.push(rx);
        }
        async move {
            join_all(waits).await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ServerActivity>> {
        self.activities
            .lock()
            .iter()
            .map(|(_, a)| Arc::clone(a))
            .collect()
    }

    fn set_state(&self, next: SuspendState) {
        *self.state.lock() = next;
        tracing::debug!(state = ?next, "Suspend state changed");
    }
}

impl Default for SuspendController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Flag {
        paused: AtomicBool,
    }

    impl ServerActivity for Flag {
        fn pre_suspend(&self, done: ActivityCompletion) {
            self.paused.store(true, Ordering::SeqCst);
            done.done();
        }

        fn suspended(&self, done: ActivityCompletion) {
            done.done();
        }

        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    struct Stuck {
        held: Mutex<Vec<ActivityCompletion>>,
    }

    impl ServerActivity for Stuck {
        fn pre_suspend(&self, done: ActivityCompletion) {
            self.held.lock().push(done);
        }

        fn suspended(&self, done: ActivityCompletion) {
            done.done();
        }

        fn resume(&self) {}
    }

    #[tokio::test]
    async fn suspend_and_resume_reach_every_activity() {
        let controller = SuspendController::new();
        let activity = Arc::new(Flag::default());
        controller.register_activity(activity.clone());

        assert!(controller.suspend(Duration::from_secs(1)).await);
        assert_eq!(controller.state(), SuspendState::Suspended);
        assert!(activity.paused.load(Ordering::SeqCst));

        controller.resume();
        assert_eq!(controller.state(), SuspendState::Running);
        assert!(!activity.paused.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn suspend_times_out_on_unfinished_activity() {
        let controller = SuspendController::new();
        controller.register_activity(Arc::new(Stuck {
            held: Mutex::new(Vec::new()),
        }));
        assert!(!controller.suspend(Duration::from_millis(50)).await);
        assert_eq!(controller.state(), SuspendState::Suspended);
    }

    #[test]
    fn unregister_removes_activity() {
        let controller = SuspendController::new();
        let id = controller.register_activity(Arc::new(Flag::default()));
        assert_eq!(controller.activity_count(), 1);
        assert!(controller.unregister_activity(id));
        assert_eq!(controller.activity_count(), 0);
    }
}
