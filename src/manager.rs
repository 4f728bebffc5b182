mod schedule;
mod setup;
mod worker;

/// Error returned by `Manager::create` when the configuration is rejected or
/// a thread cannot be spawned.
pub use crate::manager::setup::ManagerError;
use crate::{
    config::{ExecutionMode, ManagerConfig},
    entry::{Entry, EntryArena},
    job::Job,
    mt::{Semaphore, Task},
    queue::LockFreeFixedQueue,
    transaction::Transaction,
    types::{EntryHandle, GroupHandle, JobFlags, JobHandle, Priority},
    utils,
};
use derive_more::Debug;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
    },
    time::Duration,
};

/// Capacity of each per-priority ready queue.
pub const READY_QUEUE_CAPACITY: usize = 512;
/// Maximum number of jobs handed to workers and not yet finished.
pub const TRANSACTION_QUEUE_CAPACITY: usize = 32;

pub(crate) type ReadyQueue = LockFreeFixedQueue<EntryHandle, READY_QUEUE_CAPACITY>;
pub(crate) type JobTransaction = Arc<Transaction<EntryHandle>>;
pub(crate) type TransactionQueue = LockFreeFixedQueue<JobTransaction, TRANSACTION_QUEUE_CAPACITY>;

/// Dependency-graph job scheduler.
///
/// Callers create jobs (and optionally groups or barriers), wire edges with
/// [`add_dependency`](Self::add_dependency), then [`schedule`](Self::schedule)
/// each job. A job whose prerequisites are all done enters the ready queue of
/// its priority; the scheduler moves ready jobs, highest priority first, into a
/// bounded transaction queue that the worker threads consume. When a job's
/// `execute` returns, its dependents are released, which may make them ready
/// in turn, until the graph drains.
///
/// Wiring must be finished before the first `schedule` of the graph: adding
/// edges to entries that are already running is not supported.
///
/// Dropping the manager stops the worker and scheduler threads. Jobs that are
/// executing finish; jobs still queued never run.
#[derive(Debug)]
pub struct Manager {
    shared: Arc<Shared>,
    workers: Vec<Task>,
    scheduler: Option<Task>,
    config: ManagerConfig,
}

/// State shared by the manager handle, the workers and the scheduler thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) mode: ExecutionMode,
    pub(crate) entries: EntryArena,
    pub(crate) ready_queues: [ReadyQueue; Priority::COUNT],
    pub(crate) transactions: TransactionQueue,
    /// Dispatched transactions the scheduler has not finished yet.
    pub(crate) pending: Mutex<Vec<JobTransaction>>,
    /// Ready jobs that did not fit their ready queue, oldest first.
    pub(crate) deferred: Mutex<Vec<(EntryHandle, Priority)>>,
    /// Scheduling requests in flight; only the caller that raises it from 0
    /// runs passes.
    pub(crate) scheduling: AtomicI32,
    pub(crate) scheduler_signal: Semaphore,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) scheduled_total: AtomicU64,
    pub(crate) executed_total: AtomicU64,
}

impl Shared {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            entries: EntryArena::default(),
            ready_queues: std::array::from_fn(|_| ReadyQueue::new()),
            transactions: TransactionQueue::new(),
            pending: Mutex::new(Vec::with_capacity(TRANSACTION_QUEUE_CAPACITY)),
            deferred: Mutex::new(Vec::new()),
            scheduling: AtomicI32::new(0),
            // Requests collapse: one stored unit always buys one full pass.
            scheduler_signal: Semaphore::new(0, 1),
            shutting_down: AtomicBool::new(false),
            scheduled_total: AtomicU64::new(0),
            executed_total: AtomicU64::new(0),
        }
    }
}

/// Snapshot of the manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs admitted into a ready queue since creation.
    pub scheduled: u64,
    /// Jobs whose completion has been processed since creation.
    pub executed: u64,
    /// Jobs sitting in the ready queues.
    pub ready: usize,
    /// Dispatched jobs whose completion has not been processed yet.
    pub pending_transactions: usize,
    /// Ready jobs waiting for room in a full ready queue.
    pub deferred: usize,
    /// Entries alive in the arena.
    pub live_entries: usize,
}

impl Manager {
    /// Number of worker threads a default manager runs: every logical CPU but
    /// one, at least one.
    #[must_use]
    pub fn cpu_threads_count() -> u32 {
        utils::cpu_threads_count()
    }

    /// Shut the manager down. Same as dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.shared.mode
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Create a job node running `job`. It starts with no prerequisites.
    pub fn create_job(&self, flags: JobFlags, priority: Priority, job: impl Job) -> JobHandle {
        self.create_boxed_job(flags, priority, Box::new(job))
    }

    pub fn create_boxed_job(
        &self,
        flags: JobFlags,
        priority: Priority,
        job: Box<dyn Job>,
    ) -> JobHandle {
        JobHandle(self.shared.entries.insert(Entry::job(flags, priority, job)))
    }

    /// Create a group: a node without payload that completes when all its
    /// prerequisites have, and that also carries a static fan-out list
    /// re-armed on every run.
    pub fn create_group(&self, flags: JobFlags) -> GroupHandle {
        GroupHandle(self.shared.entries.insert(Entry::group(flags)))
    }

    /// Create a bare synchronisation point with no payload and no static list.
    pub fn create_barrier(&self, flags: JobFlags) -> EntryHandle {
        self.shared.entries.insert(Entry::barrier(flags))
    }

    /// Make `dependent` wait for `entry`: when `entry` completes, `dependent`
    /// loses one prerequisite. One-shot: the edge is dropped on completion.
    ///
    /// If `entry` has already completed, `dependent` is not held back and the
    /// edge waits in `entry`'s table until `entry` is re-armed with
    /// [`increment_dependency`](Self::increment_dependency). Such edges stay
    /// there for as long as `entry` is never re-armed.
    ///
    /// # Panics
    /// If either handle is stale or both are the same entry.
    pub fn add_dependency(&self, entry: impl Into<EntryHandle>, dependent: impl Into<EntryHandle>) {
        self.shared.add_dependency(entry.into(), dependent.into(), false);
    }

    /// Like [`add_dependency`](Self::add_dependency), but the edge stays on the
    /// group and is honoured on every run.
    pub fn add_static_dependency(&self, group: GroupHandle, dependent: impl Into<EntryHandle>) {
        self.shared.add_dependency(group.into(), dependent.into(), true);
    }

    /// Add a manual prerequisite to `entry`. On a completed entry this re-arms
    /// it for another run and propagates "not ready" to its dependents.
    pub fn increment_dependency(&self, entry: impl Into<EntryHandle>) {
        self.shared.increment_dependency(entry.into());
    }

    /// Remove one prerequisite from `entry`, releasing it if it was the last.
    ///
    /// # Panics
    /// If the count would drop below what the entry can legally reach.
    pub fn decrement_dependency(&self, entry: impl Into<EntryHandle>) {
        self.shared.decrement_dependency(entry.into());
    }

    /// Current dependency count, or `None` for a stale handle.
    #[must_use]
    pub fn dependency_count(&self, entry: impl Into<EntryHandle>) -> Option<i32> {
        self.shared.entries.get(entry.into()).map(|entry| entry.count())
    }

    /// Submit a job. It runs as soon as all its prerequisites are done.
    ///
    /// # Panics
    /// If the job was already submitted for this run or has already
    /// completed it.
    pub fn schedule(&self, job: JobHandle) {
        self.shared.schedule(job.into());
    }

    /// Run one scheduling pass: finish executed jobs, release their
    /// dependents and dispatch ready jobs in priority order.
    ///
    /// Reentrant: if another thread is already in a pass, the request is
    /// folded into that pass and this call returns immediately. In
    /// [`ExecutionMode::Inline`] the pass runs the jobs itself.
    pub fn do_scheduling(&self) {
        self.shared.do_scheduling();
    }

    /// Block until `entry` completes. Returns at once if the entry is already
    /// gone (an auto-destroyed job only disappears after completing).
    ///
    /// # Panics
    /// If the entry was created without [`JobFlags::SYNC_EVENT`].
    pub fn sync(&self, entry: impl Into<EntryHandle>) {
        self.shared.sync(entry.into(), None);
    }

    /// [`sync`](Self::sync) with a deadline. Returns whether the entry
    /// completed in time.
    pub fn sync_timeout(&self, entry: impl Into<EntryHandle>, timeout: Duration) -> bool {
        self.shared.sync(entry.into(), Some(timeout))
    }

    /// Whether `entry` has no pending prerequisites left (for a job: it has
    /// run). A destroyed entry counts as completed.
    #[must_use]
    pub fn is_completed(&self, entry: impl Into<EntryHandle>) -> bool {
        self.shared
            .entries
            .get(entry.into())
            .is_none_or(|entry| entry.count() == 0)
    }

    #[must_use]
    pub fn contains(&self, entry: impl Into<EntryHandle>) -> bool {
        self.shared.entries.get(entry.into()).is_some()
    }

    /// Remove an entry from the arena.
    ///
    /// # Panics
    /// If the entry is a job that is scheduled and has not completed.
    pub fn destroy_entry(&self, entry: impl Into<EntryHandle>) {
        self.shared.destroy_entry(entry.into());
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let shared = &self.shared;
        SchedulerStats {
            scheduled: shared.scheduled_total.load(Ordering::Relaxed),
            executed: shared.executed_total.load(Ordering::Relaxed),
            ready: shared.ready_queues.iter().map(ReadyQueue::len).sum(),
            pending_transactions: shared.pending.lock().len(),
            deferred: shared.deferred.lock().len(),
            live_entries: shared.entries.len(),
        }
    }
}
