use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Manual-reset event.
///
/// Once triggered it stays signalled, releasing every current and future
/// waiter, until `reset` is called.
#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    changed: Condvar,
}

impl Event {
    #[must_use]
    pub fn new(signalled: bool) -> Self {
        Self {
            signalled: Mutex::new(signalled),
            changed: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        drop(signalled);
        self.changed.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signalled.lock()
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.changed.wait(&mut signalled);
        }
    }

    /// Returns whether the event was signalled before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        let _ = self
            .changed
            .wait_while_for(&mut signalled, |signalled| !*signalled, timeout);
        *signalled
    }
}
