//! Multi-threaded job dispatch over a dependency graph.
//!
//! Callers describe work as a directed acyclic graph of jobs. A [`Manager`]
//! runs every job exactly once, after all of its prerequisites, spread over a
//! fixed pool of worker threads:
//! - Each graph node carries an atomic dependency count biased by one for
//!   jobs, so a job is ready at `1` and complete at `0`.
//! - Ready jobs wait in one bounded lock-free queue per [`Priority`] and are
//!   dispatched strictly from `High` to `Idle`, FIFO within a level.
//! - A bounded transaction queue hands dispatched jobs to the workers and caps
//!   the number of jobs in flight.
//! - Completing a job releases its dependents, which may become ready in turn,
//!   until the graph drains.
//!
//! Key modules:
//! - `queue`: the bounded multi-producer/multi-consumer [`LockFreeFixedQueue`].
//! - `manager`: the scheduler, its dependency API and the worker pool.
//! - `graph`: a keyed builder that validates a whole graph before submitting
//!   it.
//! - `mt`: thread, semaphore and event primitives.
//!
//! Quick start:
//! 1. Create a [`Manager`] from a [`ManagerConfig`].
//! 2. Create jobs with [`Manager::create_job`] (a [`ClosureJob`] or your own
//!    [`Job`] type) and wire them with [`Manager::add_dependency`].
//! 3. [`Manager::schedule`] every job, then [`Manager::sync`] on the ones you
//!    need.
//!
//! [`ExecutionMode::Inline`] runs the same graphs without threads, on whichever
//! thread drives [`Manager::do_scheduling`] or [`Manager::sync`].

/// Execution mode and manager construction options.
pub mod config;
mod entry;
/// Keyed graph builder with up-front validation and cycle detection.
pub mod graph;
/// The `Job` trait and a closure-backed implementation.
pub mod job;
/// The scheduler: entry creation, dependency wiring, admission into the
/// priority ready queues, dispatch to workers, completion cascade and
/// shutdown.
pub mod manager;
/// Threads, counting semaphore and manual-reset event.
pub mod mt;
/// Bounded lock-free multi-producer/multi-consumer queue over a fixed slot
/// pool.
///
/// Uses two rings of packed `(generation, index)` cells updated by
/// compare-exchange, with a generation stride of the capacity to rule out ABA
/// on wrap-around.
pub mod queue;
mod sync;
/// A payload paired with a completion event.
pub mod transaction;
/// Handles, priorities, flags and hash-collection aliases.
pub mod types;
mod utils;

pub use crate::{
    config::{ExecutionMode, ManagerConfig},
    graph::{GraphError, JobGraph, SubmittedGraph, SubmittedNode},
    job::{ClosureJob, Job},
    manager::{
        Manager, ManagerError, READY_QUEUE_CAPACITY, SchedulerStats, TRANSACTION_QUEUE_CAPACITY,
    },
    queue::{Delivery, LockFreeFixedQueue, Reservation},
    transaction::Transaction,
    types::{EntryHandle, GroupHandle, JobFlags, JobHandle, Priority},
};
