//! A resettable one-shot flag that threads can block on with a timeout.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Signal {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        *self.flag() = true;
        self.changed.notify_all();
    }

    pub fn clear(&self) {
        *self.flag() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag()
    }

    /// Block until the flag is raised or `timeout` elapses.
    ///
    /// Returns whether the flag was raised. The flag stays raised; callers
    /// that want edge semantics clear it themselves. A timeout too large to
    /// form a deadline waits until the flag is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut set = self.flag();
        while !*set {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            set = self
                .changed
                .wait_timeout(set, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    fn wait(&self) -> bool {
        let mut set = self.flag();
        while !*set {
            set = self
                .changed
                .wait(set)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }
}
