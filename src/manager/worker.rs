use crate::manager::{Shared, schedule::panic_message};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::atomic::Ordering,
};
use tracing::{debug, error};

/// Worker loop: run dispatched jobs until the transaction queue is aborted.
///
/// The transaction slot stays claimed until the job has finished, which is
/// what bounds the number of jobs in flight.
pub(super) fn run_worker(shared: &Shared, id: usize) {
    debug!(worker = id, "worker started");
    let mut executed = 0u64;
    while let Some(delivery) = shared.transactions.pop(true) {
        shared.execute_job(*delivery.data());
        delivery.set_completed();
        drop(delivery);
        executed += 1;
        shared.scheduler_signal.signal();
    }
    debug!(worker = id, executed, "worker stopped");
}

/// Scheduler loop: one scheduling pass per wake-up.
///
/// A pass that panics on a misused entry is logged and the loop goes on, so
/// the rest of the graph keeps being scheduled.
pub(super) fn run_scheduler(shared: &Shared) {
    debug!("scheduler started");
    while shared.scheduler_signal.wait() {
        if shared.shutting_down.load(Ordering::Acquire) {
            break;
        }
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| shared.do_scheduling())) {
            error!("scheduling pass panicked: {}", panic_message(panic.as_ref()));
            // Requests folded into the failed pass still need one.
            shared.scheduler_signal.signal();
        }
    }
    debug!("scheduler stopped");
}
