use crate::{
    config::{ExecutionMode, ManagerConfig},
    manager::{
        Manager, Shared,
        worker::{run_scheduler, run_worker},
    },
    mt::Task,
};
use std::{
    io,
    sync::{Arc, atomic::Ordering},
};
use thiserror::Error;
use tracing::info;

/// Error kind for manager construction failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// The configuration cannot describe a working manager.
    #[error("invalid manager configuration: {0}")]
    InvalidConfig(&'static str),
    /// The OS refused to start one of the manager's threads.
    #[error("failed to spawn thread `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl Manager {
    /// Start a manager.
    ///
    /// In [`ExecutionMode::ThreadPool`] this spawns the workers (pinned to
    /// cores `1..`, wrapping around, when pinning is on and the core list is
    /// known) and the scheduler thread.
    ///
    /// # Errors
    /// If the thread pool is empty or a thread cannot be spawned. Threads
    /// started before the failure are stopped again.
    pub fn create(config: ManagerConfig) -> Result<Self, ManagerError> {
        let mut manager = Self {
            shared: Arc::new(Shared::new(config.mode)),
            workers: Vec::new(),
            scheduler: None,
            config,
        };
        let ExecutionMode::ThreadPool(worker_count) = manager.config.mode else {
            info!(mode = %manager.config.mode, "manager started");
            return Ok(manager);
        };
        if worker_count == 0 {
            return Err(ManagerError::InvalidConfig(
                "thread pool needs at least one worker",
            ));
        }

        let cores = if manager.config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let prefix = manager.config.thread_name_prefix.clone();
        manager.workers.reserve_exact(worker_count as usize);
        for id in 0..worker_count as usize {
            // Core 0 stays with the thread that drives the manager.
            let core = (!cores.is_empty()).then(|| cores[(id + 1) % cores.len()]);
            let shared = Arc::clone(&manager.shared);
            let worker = spawn(format!("{prefix}-worker-{id}"), core, move || {
                run_worker(&shared, id);
            })?;
            manager.workers.push(worker);
        }
        let shared = Arc::clone(&manager.shared);
        manager.scheduler = Some(spawn(format!("{prefix}-scheduler"), None, move || {
            run_scheduler(&shared);
        })?);

        info!(
            mode = %manager.config.mode,
            pinned = !cores.is_empty(),
            "manager started"
        );
        Ok(manager)
    }

    fn shutdown(&mut self) {
        let shared = &self.shared;
        shared.transactions.abort();
        for worker in &mut self.workers {
            worker.join();
        }
        shared.shutting_down.store(true, Ordering::Release);
        shared.scheduler_signal.close();
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.join();
        }
        info!(mode = %shared.mode, "manager stopped");
    }
}

fn spawn(
    name: String,
    core: Option<core_affinity::CoreId>,
    body: impl FnOnce() + Send + 'static,
) -> Result<Task, ManagerError> {
    Task::create(name.clone(), core, body).map_err(|source| ManagerError::Spawn { name, source })
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
