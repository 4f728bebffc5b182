use crate::utils::cpu_threads_count;
use derive_more::Display;

/// How a [`Manager`](crate::manager::Manager) runs jobs.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// No threads: jobs run on whichever thread calls `do_scheduling` (or
    /// `sync`).
    #[display("inline")]
    Inline,
    /// A fixed pool of worker threads plus one scheduler thread.
    #[display("thread-pool({_0})")]
    ThreadPool(u32),
}

/// Manager construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub mode: ExecutionMode,
    /// Pin each worker to its own core, leaving the first core to the caller.
    pub pin_workers: bool,
    /// Prefix of the spawned threads' names.
    pub thread_name_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::ThreadPool(cpu_threads_count()),
            pin_workers: true,
            thread_name_prefix: "mtjd".to_owned(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inline() -> Self {
        Self::new(ExecutionMode::Inline)
    }

    #[must_use]
    pub fn with_workers(mut self, workers: u32) -> Self {
        self.mode = ExecutionMode::ThreadPool(workers);
        self
    }

    #[must_use]
    pub fn with_pinning(mut self, pin_workers: bool) -> Self {
        self.pin_workers = pin_workers;
        self
    }

    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
