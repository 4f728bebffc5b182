use crate::sync::{Condvar, Mutex, lock};
use std::sync::PoisonError;

/// Counting semaphore with an upper bound on the stored count.
///
/// Besides the classic `wait`/`signal`/`poll` triple it can be closed: a closed
/// semaphore wakes every blocked waiter and makes every later `wait` return
/// `false` immediately. Closing is how queue shutdown reaches consumers that
/// are parked on an empty queue.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
    max_count: usize,
}

#[derive(Debug)]
struct SemaphoreState {
    count: usize,
    closed: bool,
}

impl Semaphore {
    /// # Panics
    /// If `initial_count > max_count` or `max_count == 0`.
    #[must_use]
    pub fn new(initial_count: usize, max_count: usize) -> Self {
        assert!(max_count > 0, "Semaphore::new: max_count must be positive");
        assert!(
            initial_count <= max_count,
            "Semaphore::new: initial count {initial_count} exceeds max {max_count}"
        );
        Self {
            state: Mutex::new(SemaphoreState {
                count: initial_count,
                closed: false,
            }),
            available: Condvar::new(),
            max_count,
        }
    }

    /// Release one unit. Saturates at `max_count`.
    pub fn signal(&self) {
        let mut state = lock(&self.state);
        if state.count < self.max_count {
            state.count += 1;
        }
        drop(state);
        self.available.notify_one();
    }

    /// Block until a unit is available and take it.
    ///
    /// Returns `false` without taking anything if the semaphore is (or
    /// becomes) closed.
    pub fn wait(&self) -> bool {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return false;
            }
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a unit if one is available, without blocking.
    pub fn poll(&self) -> bool {
        let mut state = lock(&self.state);
        if state.closed || state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Wake every waiter and refuse all further waits. Idempotent.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Units currently available.
    #[must_use]
    pub fn count(&self) -> usize {
        lock(&self.state).count
    }
}
