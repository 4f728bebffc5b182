use crate::mt::Event;
use std::time::Duration;

/// A payload paired with a manual-reset completion event.
///
/// The scheduler wraps every dispatched job in a transaction; the worker that
/// runs the job marks it completed, and the scheduler later finds it completed
/// while scanning its pending list. This completion is about the *dispatch*
/// (the `execute` call returned), not about the job's dependency state.
#[derive(Debug, Default)]
pub struct Transaction<T> {
    data: T,
    completed: Event,
}

impl<T> Transaction<T> {
    #[must_use]
    pub fn new(data: T) -> Self {
        Self {
            data,
            completed: Event::new(false),
        }
    }

    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn set_completed(&self) {
        self.completed.trigger();
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.is_set()
    }

    pub fn wait_for_completion(&self) {
        self.completed.wait();
    }

    /// Returns whether the transaction completed within `timeout`.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        self.completed.wait_timeout(timeout)
    }

    /// Clear the completion flag so the transaction can carry another run.
    pub fn reset(&self) {
        self.completed.reset();
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.data
    }
}
