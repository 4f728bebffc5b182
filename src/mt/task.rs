use core_affinity::CoreId;
use std::{
    io,
    thread::{self, JoinHandle},
};
use tracing::{debug, warn};

/// A named OS thread with a `create`/`join` lifecycle.
///
/// Dropping a `Task` without joining it detaches the thread.
#[derive(Debug)]
pub struct Task {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    /// Spawn `body` on a new thread called `name`, optionally pinned to `core`.
    ///
    /// # Errors
    /// If the OS refuses to create the thread.
    pub fn create(
        name: impl Into<String>,
        core: Option<CoreId>,
        body: impl FnOnce() + Send + 'static,
    ) -> io::Result<Self> {
        let name = name.into();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Some(core) = core {
                if core_affinity::set_for_current(core) {
                    debug!(task = %thread_name, core = core.id, "pinned");
                } else {
                    warn!(task = %thread_name, core = core.id, "could not set affinity");
                }
            }
            body();
        })?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread to exit. A panic inside the thread is logged, not
    /// propagated.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!(task = %self.name, "task panicked");
        }
    }
}
