use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tavla_core::sync;

/// State of a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    StopRequested,
    Stopped,
}

/// Start/stop handshake between a worker thread and its owner.
///
/// The worker sleeps through [`Lifecycle::sleep`], which wakes early when a
/// stop is requested. The owner calls [`Lifecycle::request_stop`] and then
/// [`Lifecycle::wait_stopped`].
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Starting),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *sync::lock(&self.state)
    }

    /// `Starting -> Running`. Returns `false` if a stop came first.
    pub fn mark_running(&self) -> bool {
        let mut state = sync::lock(&self.state);
        if *state != LifecycleState::Starting {
            return false;
        }
        *state = LifecycleState::Running;
        self.changed.notify_all();
        true
    }

    /// Returns `false` if the worker had already stopped.
    pub fn request_stop(&self) -> bool {
        let mut state = sync::lock(&self.state);
        match *state {
            LifecycleState::Starting | LifecycleState::Running => {
                *state = LifecycleState::StopRequested;
                self.changed.notify_all();
                true
            }
            LifecycleState::StopRequested => true,
            LifecycleState::Stopped => false,
        }
    }

    pub fn mark_stopped(&self) {
        let mut state = sync::lock(&self.state);
        *state = LifecycleState::Stopped;
        self.changed.notify_all();
    }

    /// Sleep for `duration` unless a stop is requested. Returns `true` if
    /// the full duration elapsed and the worker should keep going.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = sync::lock(&self.state);
        loop {
            if matches!(
                *state,
                LifecycleState::StopRequested | LifecycleState::Stopped
            ) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Block until the worker reports `Stopped`.
    pub fn wait_stopped(&self) {
        let mut state = sync::lock(&self.state);
        while *state != LifecycleState::Stopped {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sleep_completes_without_stop() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.mark_running());
        assert!(lifecycle.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let lifecycle = Arc::new(Lifecycle::new());
        let worker = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || {
                lifecycle.mark_running();
                let started = Instant::now();
                let completed = lifecycle.sleep(Duration::from_secs(60));
                lifecycle.mark_stopped();
                (completed, started.elapsed())
            })
        };

        while lifecycle.state() == LifecycleState::Starting {
            thread::yield_now();
        }
        assert!(lifecycle.request_stop());
        lifecycle.wait_stopped();

        let (completed, elapsed) = worker.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(60));
    }

    #[test]
    fn test_stop_before_running() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.request_stop());
        assert!(!lifecycle.mark_running());
        lifecycle.mark_stopped();
        assert!(!lifecycle.request_stop());
    }
}
