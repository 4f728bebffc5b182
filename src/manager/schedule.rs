use crate::{
    config::ExecutionMode,
    entry::{Entry, JobState},
    manager::{Shared, TRANSACTION_QUEUE_CAPACITY},
    transaction::Transaction,
    types::{EntryHandle, Priority},
};
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};
use tracing::{error, trace, warn};

/// Longest an inline `sync` sleeps before driving another scheduling pass.
const INLINE_SYNC_SLICE: Duration = Duration::from_millis(1);

impl Shared {
    fn entry(&self, handle: EntryHandle, operation: &str) -> Arc<Entry> {
        self.entries
            .get(handle)
            .unwrap_or_else(|| panic!("{operation}: {handle} does not exist"))
    }

    fn priority_of(&self, handle: EntryHandle) -> Option<Priority> {
        self.entries
            .get(handle)
            .and_then(|entry| entry.as_job().map(|job| job.priority))
    }

    pub(crate) fn add_dependency(&self, entry: EntryHandle, dependent: EntryHandle, is_static: bool) {
        assert_ne!(entry, dependent, "add_dependency: {entry} cannot depend on itself");
        let prerequisite = self.entry(entry, "add_dependency");
        let successor = self.entry(dependent, "add_dependency");
        if is_static {
            prerequisite
                .static_table()
                .unwrap_or_else(|| panic!("add_static_dependency: {entry} is not a group"))
                .lock()
                .push(dependent);
        } else {
            prerequisite.dependency_table.lock().push(dependent);
        }
        // A completed prerequisite only counts once it is re-armed; until then
        // the edge just sits in its table.
        if prerequisite.count() > 0 {
            self.gate(dependent, &successor);
        }
        trace!(%entry, %dependent, is_static, "dependency added");
    }

    /// One more prerequisite, arriving through an edge.
    fn gate(&self, handle: EntryHandle, entry: &Entry) {
        let is_job = entry.as_job().is_some();
        let (Ok(previous) | Err(previous)) =
            entry
                .dependency_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    // A completed job also gets its self gate back.
                    Some(if count == 0 && is_job { 2 } else { count + 1 })
                });
        if previous == 0 {
            self.dependency_not_ready(handle, entry);
        }
    }

    pub(crate) fn increment_dependency(&self, handle: EntryHandle) {
        let entry = self.entry(handle, "increment_dependency");
        if let Some(job) = entry.as_job() {
            assert!(
                !(job.scheduled.load(Ordering::Acquire) && entry.count() == 1),
                "increment_dependency: {handle} is already queued for execution"
            );
        }
        let previous = entry.dependency_count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.dependency_not_ready(handle, &entry);
        }
    }

    /// The entry went from completed back to pending: forget the previous run
    /// and hold back everything that waits on it.
    fn dependency_not_ready(&self, handle: EntryHandle, entry: &Entry) {
        trace!(entry = %handle, "re-armed");
        if let Some(event) = &entry.sync_event {
            event.reset();
        }
        if let Some(job) = entry.as_job() {
            job.rearm();
        }
        let mut dependents = entry.dependency_table.lock().clone();
        if let Some(table) = entry.static_table() {
            dependents.extend_from_slice(&table.lock());
        }
        for dependent in dependents {
            if let Some(successor) = self.entries.get(dependent) {
                self.gate(dependent, &successor);
            }
        }
    }

    pub(crate) fn decrement_dependency(&self, handle: EntryHandle) {
        let entry = self.entry(handle, "decrement_dependency");
        self.release(handle, &entry);
        self.request_scheduling();
    }

    /// One prerequisite fewer. A job never drops below its self gate here;
    /// only its own completion takes it to zero.
    fn release(&self, handle: EntryHandle, entry: &Entry) {
        let floor = i32::from(entry.as_job().is_some());
        let remaining = entry
            .dependency_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count > floor).then(|| count - 1)
            })
            .unwrap_or_else(|count| {
                panic!("decrement_dependency: {handle} has no prerequisite left (count {count})")
            })
            - 1;
        match entry.as_job() {
            Some(job) if remaining == 1 => {
                if job.submitted.load(Ordering::SeqCst) {
                    self.admit(handle, job);
                }
            }
            None if remaining == 0 => self.dependency_ready(handle, entry),
            _ => {}
        }
    }

    /// The entry completed: wake its waiters and release its dependents.
    fn dependency_ready(&self, handle: EntryHandle, entry: &Entry) {
        trace!(entry = %handle, "completed");
        if let Some(event) = &entry.sync_event {
            event.trigger();
        }
        let mut dependents = mem::take(&mut *entry.dependency_table.lock());
        if let Some(table) = entry.static_table() {
            dependents.extend_from_slice(&table.lock());
        }
        for dependent in dependents {
            match self.entries.get(dependent) {
                Some(successor) => self.release(dependent, &successor),
                None => trace!(entry = %handle, %dependent, "dependent is gone"),
            }
        }
    }

    pub(crate) fn schedule(&self, handle: EntryHandle) {
        let entry = self.entry(handle, "schedule");
        let job = entry
            .as_job()
            .unwrap_or_else(|| panic!("schedule: {handle} is not a job"));
        assert!(
            entry.count() > 0 && !job.executed.load(Ordering::Acquire),
            "schedule: {handle} has already run; re-arm it with increment_dependency first"
        );
        assert!(
            !job.submitted.swap(true, Ordering::SeqCst),
            "schedule: {handle} is already scheduled"
        );
        if entry.dependency_count.load(Ordering::SeqCst) == 1 {
            self.admit(handle, job);
        }
        self.request_scheduling();
    }

    /// Put a ready job into its ready queue, unless it is there already.
    fn admit(&self, handle: EntryHandle, job: &JobState) {
        if job
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
        trace!(entry = %handle, priority = %job.priority, "ready");
        self.enqueue_ready(handle, job.priority);
    }

    /// Jobs of a level queue up behind that level's deferred jobs, so a
    /// slot freed in the ready queue cannot let a later job overtake them.
    fn enqueue_ready(&self, handle: EntryHandle, priority: Priority) {
        let mut deferred = self.deferred.lock();
        if deferred.iter().any(|&(_, level)| level == priority) {
            deferred.push((handle, priority));
            return;
        }
        if let Err(handle) = self.ready_queues[priority.index()].push_value(handle, false) {
            warn!(entry = %handle, %priority, "ready queue is full, deferring");
            deferred.push((handle, priority));
        }
    }

    pub(crate) fn request_scheduling(&self) {
        if let ExecutionMode::ThreadPool(_) = self.mode {
            self.scheduler_signal.signal();
        }
    }

    pub(crate) fn do_scheduling(&self) {
        if self.scheduling.fetch_add(1, Ordering::AcqRel) > 0 {
            // The pass in flight picks this request up.
            return;
        }
        loop {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.scheduling_pass())) {
                // Later requests must still get a pass.
                self.scheduling.store(0, Ordering::Release);
                panic::resume_unwind(panic);
            }
            if self
                .scheduling
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            // Requests arrived during the pass: fold them into one more.
            self.scheduling.store(1, Ordering::Release);
        }
    }

    fn scheduling_pass(&self) {
        self.readmit_deferred();
        self.finish_transactions();
        match self.mode {
            ExecutionMode::Inline => self.run_ready_inline(),
            ExecutionMode::ThreadPool(_) => self.dispatch_ready(),
        }
    }

    /// Move deferred jobs into ready queues that have room again, keeping
    /// their order within a priority.
    fn readmit_deferred(&self) {
        let mut deferred = self.deferred.lock();
        if deferred.is_empty() {
            return;
        }
        let mut blocked = [false; Priority::COUNT];
        deferred.retain(|&(handle, priority)| {
            let level = priority.index();
            if blocked[level] {
                return true;
            }
            let full = self.ready_queues[level].push_value(handle, false).is_err();
            blocked[level] = full;
            full
        });
    }

    fn pop_ready(&self) -> Option<EntryHandle> {
        Priority::ALL
            .iter()
            .find_map(|priority| self.ready_queues[priority.index()].pop_value(false))
    }

    /// Hand ready jobs to the workers, highest priority first, while
    /// transaction slots are free.
    fn dispatch_ready(&self) {
        while self.transactions.allocated() < TRANSACTION_QUEUE_CAPACITY {
            let Some(handle) = self.pop_ready() else {
                break;
            };
            let transaction = Arc::new(Transaction::new(handle));
            let Ok(reservation) = self.transactions.alloc_with(Arc::clone(&transaction), false)
            else {
                self.requeue(handle);
                break;
            };
            self.pending.lock().push(Arc::clone(&transaction));
            if reservation.push(false).is_err() {
                self.pending
                    .lock()
                    .retain(|pending| !Arc::ptr_eq(pending, &transaction));
                self.requeue(handle);
                break;
            }
            trace!(entry = %handle, "dispatched");
        }
    }

    fn requeue(&self, handle: EntryHandle) {
        if let Some(priority) = self.priority_of(handle) {
            self.enqueue_ready(handle, priority);
        }
    }

    /// Complete executed jobs in dispatch order. Each one leaves `pending`
    /// only when its turn comes, so a panicking completion loses no other.
    fn finish_transactions(&self) {
        loop {
            let finished = {
                let mut pending = self.pending.lock();
                pending
                    .iter()
                    .position(|transaction| transaction.is_completed())
                    .map(|idx| pending.remove(idx))
            };
            let Some(transaction) = finished else {
                break;
            };
            self.complete_job(*transaction.data());
        }
    }

    /// Run every ready job on the calling thread, highest priority first.
    /// Jobs released by a completion compete with the ones already waiting.
    fn run_ready_inline(&self) {
        loop {
            self.readmit_deferred();
            let Some(handle) = self.pop_ready() else {
                break;
            };
            self.execute_job(handle);
            self.complete_job(handle);
        }
    }

    pub(crate) fn execute_job(&self, handle: EntryHandle) {
        let Some(entry) = self.entries.get(handle) else {
            warn!(entry = %handle, "dispatched job is gone");
            return;
        };
        let Some(job) = entry.as_job() else {
            return;
        };
        assert!(
            !job.executed.swap(true, Ordering::AcqRel),
            "execute: {handle} has already run"
        );
        let mut payload = job.payload.lock();
        trace!(entry = %handle, job = payload.name(), "executing");
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| payload.execute())) {
            error!(
                entry = %handle,
                job = payload.name(),
                "job panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }

    /// Post-execution half of a job run: `on_executed`, then release the self
    /// gate and everything waiting on the job.
    fn complete_job(&self, handle: EntryHandle) {
        let Some(entry) = self.entries.get(handle) else {
            return;
        };
        let Some(job) = entry.as_job() else {
            return;
        };
        {
            let mut payload = job.payload.lock();
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| payload.on_executed())) {
                error!(
                    entry = %handle,
                    job = payload.name(),
                    "on_executed panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        let previous = entry.dependency_count.fetch_sub(1, Ordering::SeqCst);
        assert_eq!(
            previous, 1,
            "complete: {handle} gained prerequisites while running"
        );
        self.executed_total.fetch_add(1, Ordering::Relaxed);
        // Gone before anyone waiting on it wakes up.
        if job.auto_destroy {
            self.entries.remove(handle);
            trace!(entry = %handle, "auto-destroyed");
        }
        self.dependency_ready(handle, &entry);
    }

    pub(crate) fn sync(&self, handle: EntryHandle, timeout: Option<Duration>) -> bool {
        let Some(entry) = self.entries.get(handle) else {
            return true;
        };
        let event = entry
            .sync_event
            .as_ref()
            .unwrap_or_else(|| panic!("sync: {handle} was created without JobFlags::SYNC_EVENT"));
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        match self.mode {
            ExecutionMode::ThreadPool(_) => match timeout {
                None => {
                    event.wait();
                    true
                }
                Some(timeout) => event.wait_timeout(timeout),
            },
            ExecutionMode::Inline => loop {
                self.do_scheduling();
                if event.is_set() {
                    return true;
                }
                let slice = match deadline {
                    None => INLINE_SYNC_SLICE,
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        if left.is_zero() {
                            return false;
                        }
                        left.min(INLINE_SYNC_SLICE)
                    }
                };
                if event.wait_timeout(slice) {
                    return true;
                }
            },
        }
    }

    pub(crate) fn destroy_entry(&self, handle: EntryHandle) {
        let Some(entry) = self.entries.get(handle) else {
            return;
        };
        if let Some(job) = entry.as_job() {
            let queued =
                job.submitted.load(Ordering::Acquire) || job.scheduled.load(Ordering::Acquire);
            assert!(
                !(queued && entry.count() > 0),
                "destroy_entry: {handle} is scheduled and has not completed"
            );
        }
        self.entries.remove(handle);
        trace!(entry = %handle, "destroyed");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
