#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use mtjd::{
    ClosureJob, ExecutionMode, JobFlags, JobHandle, Manager, ManagerConfig, ManagerError,
    Priority, READY_QUEUE_CAPACITY,
};
use std::{
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const LEN: usize = 10_000;

fn thread_pool(workers: u32) -> Manager {
    Manager::create(ManagerConfig::default().with_workers(workers).with_pinning(false)).unwrap()
}

fn inline() -> Manager {
    Manager::create(ManagerConfig::inline()).unwrap()
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn logging_job(manager: &Manager, log: &Log, name: &'static str, priority: Priority) -> JobHandle {
    let log = Arc::clone(log);
    manager.create_job(
        JobFlags::NONE,
        priority,
        ClosureJob::new(name, move || log.lock().unwrap().push(name)),
    )
}

#[test]
fn chained_buffer_sums() {
    let manager = thread_pool(3);
    let x: Arc<Vec<f32>> = Arc::new((0..LEN).map(|i| (i % 97) as f32).collect());
    let buffers: Vec<_> = (0..=10)
        .map(|_| Arc::new(Mutex::new(vec![0.0f32; LEN])))
        .collect();

    let jobs: Vec<_> = (0..10)
        .map(|i| {
            let input = Arc::clone(&buffers[i]);
            let output = Arc::clone(&buffers[i + 1]);
            let x = Arc::clone(&x);
            let flags = if i == 9 {
                JobFlags::SYNC_EVENT
            } else {
                JobFlags::NONE
            };
            manager.create_job(
                flags,
                Priority::Normal,
                ClosureJob::new(format!("sum-{i}"), move || {
                    let input = input.lock().unwrap();
                    let mut output = output.lock().unwrap();
                    for ((out, a), b) in output.iter_mut().zip(input.iter()).zip(x.iter()) {
                        *out = a + b;
                    }
                }),
            )
        })
        .collect();
    for pair in jobs.windows(2) {
        manager.add_dependency(pair[0], pair[1]);
    }
    // Submission order must not matter.
    for &job in jobs.iter().rev() {
        manager.schedule(job);
    }
    manager.sync(jobs[9]);

    let result = buffers[10].lock().unwrap();
    for (value, x) in result.iter().zip(x.iter()) {
        assert_eq!(*value, 10.0 * x);
    }
    assert!(jobs.iter().all(|&job| manager.is_completed(job)));
    assert_eq!(manager.stats().executed, 10);
}

#[test]
fn higher_priority_runs_first() {
    let manager = inline();
    let log = Log::default();
    let idle = logging_job(&manager, &log, "idle", Priority::Idle);
    let normal = logging_job(&manager, &log, "normal", Priority::Normal);
    let high = logging_job(&manager, &log, "high", Priority::High);

    manager.schedule(idle);
    manager.schedule(normal);
    manager.schedule(high);
    assert!(log.lock().unwrap().is_empty());
    manager.do_scheduling();

    assert_eq!(*log.lock().unwrap(), ["high", "normal", "idle"]);
}

#[test]
fn released_job_competes_by_priority() {
    let manager = inline();
    let log = Log::default();
    let first = logging_job(&manager, &log, "first", Priority::High);
    let follow_up = logging_job(&manager, &log, "follow-up", Priority::High);
    let low = logging_job(&manager, &log, "low", Priority::Low);
    manager.add_dependency(first, follow_up);

    manager.schedule(low);
    manager.schedule(follow_up);
    manager.schedule(first);
    manager.do_scheduling();

    assert_eq!(*log.lock().unwrap(), ["first", "follow-up", "low"]);
}

#[test]
fn single_worker_serves_high_before_idle() {
    let manager = thread_pool(1);
    let log = Log::default();
    let gate = manager.create_barrier(JobFlags::NONE);
    manager.increment_dependency(gate);
    let idle = logging_job(&manager, &log, "idle", Priority::Idle);
    let high = logging_job(&manager, &log, "high", Priority::High);
    let done = manager.create_barrier(JobFlags::SYNC_EVENT);
    for job in [idle, high] {
        manager.add_dependency(gate, job);
        manager.add_dependency(job, done);
        manager.schedule(job);
    }
    // Let the scheduler go idle, so both jobs are ready before its next pass.
    thread::sleep(Duration::from_millis(50));
    manager.decrement_dependency(gate);
    manager.sync(done);

    assert_eq!(*log.lock().unwrap(), ["high", "idle"]);
}

#[test]
fn inline_diamond_runs_on_calling_thread() {
    let manager = inline();
    let caller = thread::current().id();
    let log = Log::default();
    let ran_elsewhere = Arc::new(AtomicUsize::new(0));

    let make = |name: &'static str, flags: JobFlags| {
        let log = Arc::clone(&log);
        let ran_elsewhere = Arc::clone(&ran_elsewhere);
        manager.create_job(
            flags,
            Priority::Normal,
            ClosureJob::new(name, move || {
                if thread::current().id() != caller {
                    ran_elsewhere.fetch_add(1, Ordering::Relaxed);
                }
                log.lock().unwrap().push(name);
            }),
        )
    };
    let a = make("a", JobFlags::NONE);
    let b = make("b", JobFlags::NONE);
    let c = make("c", JobFlags::NONE);
    let d = make("d", JobFlags::SYNC_EVENT);
    manager.add_dependency(a, b);
    manager.add_dependency(a, c);
    manager.add_dependency(b, d);
    manager.add_dependency(c, d);
    for job in [d, c, b, a] {
        manager.schedule(job);
    }

    manager.sync(d);

    let log = log.lock().unwrap();
    assert_eq!(log.first(), Some(&"a"));
    assert_eq!(log.last(), Some(&"d"));
    assert_eq!(log.len(), 4);
    assert_eq!(ran_elsewhere.load(Ordering::Relaxed), 0);
    assert_eq!(manager.execution_mode(), ExecutionMode::Inline);
    assert_eq!(manager.worker_count(), 0);
}

#[test]
fn group_static_table_is_rearmed_on_every_run() {
    let manager = inline();
    let runs = Arc::new(AtomicUsize::new(0));
    let group = manager.create_group(JobFlags::SYNC_EVENT);
    assert!(manager.is_completed(group));

    manager.increment_dependency(group);
    let member = {
        let runs = Arc::clone(&runs);
        manager.create_job(
            JobFlags::SYNC_EVENT,
            Priority::Normal,
            ClosureJob::new("member", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }),
        )
    };
    manager.add_static_dependency(group, member);
    assert_eq!(manager.dependency_count(member), Some(2));

    for run in 1..=2 {
        manager.schedule(member);
        manager.do_scheduling();
        assert_eq!(runs.load(Ordering::SeqCst), run - 1, "member ran before the group");

        manager.decrement_dependency(group);
        assert!(manager.is_completed(group));
        manager.sync(member);
        assert_eq!(runs.load(Ordering::SeqCst), run);

        // Re-arm for the next run: the static member is gated again.
        manager.increment_dependency(group);
        assert_eq!(manager.dependency_count(member), Some(2));
    }
}

#[test]
fn dynamic_edges_are_one_shot() {
    let manager = inline();
    let barrier = manager.create_barrier(JobFlags::NONE);
    manager.increment_dependency(barrier);
    let log = Log::default();
    let job = logging_job(&manager, &log, "job", Priority::Normal);
    manager.add_dependency(barrier, job);
    manager.schedule(job);
    manager.decrement_dependency(barrier);
    manager.do_scheduling();
    assert!(manager.is_completed(job));

    // The edge was consumed: re-arming the barrier leaves the job alone.
    manager.increment_dependency(barrier);
    assert_eq!(manager.dependency_count(job), Some(0));
    assert_eq!(*log.lock().unwrap(), ["job"]);
}

#[test]
fn completed_job_can_run_again_after_rearm() {
    let manager = inline();
    let log = Log::default();
    let job = logging_job(&manager, &log, "again", Priority::Normal);
    manager.schedule(job);
    manager.do_scheduling();
    assert!(manager.is_completed(job));

    manager.increment_dependency(job);
    assert_eq!(manager.dependency_count(job), Some(1));
    manager.schedule(job);
    manager.do_scheduling();
    assert_eq!(*log.lock().unwrap(), ["again", "again"]);
}

#[test]
fn auto_destroy_removes_completed_job() {
    let manager = inline();
    let job = manager.create_job(
        JobFlags::SYNC_EVENT | JobFlags::AUTO_DESTROY,
        Priority::Normal,
        ClosureJob::new("ephemeral", || {}),
    );
    assert!(manager.contains(job));
    manager.schedule(job);
    manager.sync(job);

    assert!(!manager.contains(job));
    assert!(manager.is_completed(job));
    assert_eq!(manager.dependency_count(job), None);
    // Syncing a destroyed entry returns at once.
    manager.sync(job);
    assert_eq!(manager.stats().live_entries, 0);
}

#[test]
fn on_executed_follows_execute() {
    let manager = inline();
    let log = Log::default();
    let job = {
        let execute_log = Arc::clone(&log);
        let executed_log = Arc::clone(&log);
        manager.create_job(
            JobFlags::NONE,
            Priority::Normal,
            ClosureJob::new("hooks", move || execute_log.lock().unwrap().push("execute"))
                .with_on_executed(move || executed_log.lock().unwrap().push("on_executed")),
        )
    };
    manager.schedule(job);
    manager.do_scheduling();
    assert_eq!(*log.lock().unwrap(), ["execute", "on_executed"]);
}

#[test]
fn panicking_job_still_releases_dependents() {
    let manager = inline();
    let log = Log::default();
    let faulty = manager.create_job(
        JobFlags::NONE,
        Priority::Normal,
        ClosureJob::new("faulty", || panic!("boom")),
    );
    let after = logging_job(&manager, &log, "after", Priority::Normal);
    manager.add_dependency(faulty, after);
    manager.schedule(faulty);
    manager.schedule(after);
    manager.do_scheduling();

    assert_eq!(*log.lock().unwrap(), ["after"]);
    assert_eq!(manager.stats().executed, 2);
}

#[test]
fn sync_timeout_expires_on_blocked_job() {
    let manager = inline();
    let job = manager.create_job(
        JobFlags::SYNC_EVENT,
        Priority::Normal,
        ClosureJob::new("blocked", || {}),
    );
    manager.increment_dependency(job);
    manager.schedule(job);
    assert!(!manager.sync_timeout(job, Duration::from_millis(20)));
    assert!(!manager.is_completed(job));

    manager.decrement_dependency(job);
    assert!(manager.sync_timeout(job, Duration::from_secs(5)));
}

#[test]
fn wide_fan_in_drains_past_ready_queue_capacity() {
    const JOBS: usize = 2_000;
    let manager = thread_pool(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let done = manager.create_barrier(JobFlags::SYNC_EVENT);
    let jobs: Vec<_> = (0..JOBS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let job = manager.create_job(
                JobFlags::AUTO_DESTROY,
                Priority::Normal,
                ClosureJob::new("count", move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            );
            manager.add_dependency(job, done);
            job
        })
        .collect();
    assert_eq!(manager.dependency_count(done), Some(JOBS as i32));
    for job in jobs {
        manager.schedule(job);
    }

    assert!(manager.sync_timeout(done, Duration::from_secs(30)));
    assert_eq!(counter.load(Ordering::Relaxed), JOBS);
    let stats = manager.stats();
    assert_eq!(stats.scheduled, JOBS as u64);
    assert_eq!(stats.executed, JOBS as u64);
    assert_eq!(stats.live_entries, 1);
}

#[test]
fn overflowing_priority_keeps_release_order() {
    let manager = inline();
    let order = Arc::new(Mutex::new(Vec::new()));
    let record = |index: usize| {
        let order = Arc::clone(&order);
        manager.create_job(
            JobFlags::NONE,
            Priority::Normal,
            ClosureJob::new("record", move || order.lock().unwrap().push(index)),
        )
    };
    let jobs: Vec<_> = (0..=READY_QUEUE_CAPACITY).map(&record).collect();
    let late = record(1_000);
    manager.add_dependency(jobs[0], late);
    for &job in &jobs {
        manager.schedule(job);
    }
    manager.schedule(late);
    assert_eq!(manager.stats().deferred, 1);

    // `late` becomes ready once a slot is free, but the deferred job is older.
    manager.do_scheduling();
    let order = order.lock().unwrap();
    assert_eq!(order.len(), READY_QUEUE_CAPACITY + 2);
    let position = |index| order.iter().position(|&ran| ran == index).unwrap();
    assert!(position(READY_QUEUE_CAPACITY) < position(1_000));
    assert_eq!(manager.stats().deferred, 0);
}

#[test]
fn nested_do_scheduling_returns_and_outer_pass_runs_the_work() {
    let manager = Arc::new(inline());
    let log = Log::default();
    let nested_saw_b = Arc::new(AtomicBool::new(true));
    let b = logging_job(&manager, &log, "b", Priority::Normal);
    let a = {
        let weak = Arc::downgrade(&manager);
        let log = Arc::clone(&log);
        let nested_saw_b = Arc::clone(&nested_saw_b);
        manager.create_job(
            JobFlags::NONE,
            Priority::High,
            ClosureJob::new("a", move || {
                log.lock().unwrap().push("a");
                let manager = weak.upgrade().unwrap();
                manager.schedule(b);
                manager.do_scheduling();
                nested_saw_b.store(log.lock().unwrap().contains(&"b"), Ordering::SeqCst);
            }),
        )
    };
    manager.schedule(a);
    manager.do_scheduling();

    assert!(!nested_saw_b.load(Ordering::SeqCst), "nested call ran a pass");
    assert_eq!(*log.lock().unwrap(), ["a", "b"]);

    // The guard is released: a later call runs its own pass.
    let c = logging_job(&manager, &log, "c", Priority::Normal);
    manager.schedule(c);
    manager.do_scheduling();
    assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
}

#[test]
fn edge_from_completed_barrier_counts_after_rearm() {
    let manager = inline();
    let log = Log::default();
    let barrier = manager.create_barrier(JobFlags::NONE);
    let job = logging_job(&manager, &log, "job", Priority::Normal);
    manager.add_dependency(barrier, job);
    assert_eq!(manager.dependency_count(job), Some(1));

    manager.increment_dependency(barrier);
    assert_eq!(manager.dependency_count(job), Some(2));
    manager.schedule(job);
    manager.do_scheduling();
    assert!(log.lock().unwrap().is_empty());

    manager.decrement_dependency(barrier);
    manager.do_scheduling();
    assert_eq!(*log.lock().unwrap(), ["job"]);
}

#[test]
fn scheduler_survives_a_failed_completion() {
    let manager = Arc::new(thread_pool(1));
    let blocker = manager.create_barrier(JobFlags::NONE);
    manager.increment_dependency(blocker);
    let executed = Arc::new(AtomicBool::new(false));
    let own_handle = Arc::new(OnceLock::new());
    let misbehaving = {
        let weak = Arc::downgrade(&manager);
        let executed = Arc::clone(&executed);
        let own_handle = Arc::clone(&own_handle);
        manager.create_job(
            JobFlags::NONE,
            Priority::Normal,
            ClosureJob::new("rewires-itself", move || {
                let manager = weak.upgrade().unwrap();
                // Gains a prerequisite while running: its completion panics.
                manager.add_dependency(blocker, *own_handle.get().unwrap());
                executed.store(true, Ordering::SeqCst);
            }),
        )
    };
    own_handle.set(misbehaving).unwrap();
    manager.schedule(misbehaving);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !executed.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "job never ran");
        thread::sleep(Duration::from_millis(1));
    }

    let next = manager.create_job(
        JobFlags::SYNC_EVENT,
        Priority::Normal,
        ClosureJob::new("next", || {}),
    );
    manager.schedule(next);
    assert!(manager.sync_timeout(next, Duration::from_secs(5)));
    assert!(!manager.is_completed(misbehaving));
}

#[test]
fn destroy_stops_idle_threads() {
    let manager = thread_pool(2);
    assert_eq!(manager.worker_count(), 2);
    assert_eq!(manager.execution_mode(), ExecutionMode::ThreadPool(2));
    manager.destroy();
}

#[test]
fn empty_thread_pool_is_rejected() {
    let err = Manager::create(ManagerConfig::new(ExecutionMode::ThreadPool(0))).unwrap_err();
    assert!(matches!(err, ManagerError::InvalidConfig(_)));
}

#[test]
fn cpu_threads_count_leaves_one_core() {
    let logical = thread::available_parallelism().map_or(1, usize::from) as u32;
    assert_eq!(Manager::cpu_threads_count(), logical.saturating_sub(1).max(1));
}

#[test]
#[should_panic(expected = "already scheduled")]
fn double_schedule_panics() {
    let manager = inline();
    let job = manager.create_job(JobFlags::NONE, Priority::Normal, ClosureJob::new("twice", || {}));
    manager.schedule(job);
    manager.schedule(job);
}

#[test]
#[should_panic(expected = "no prerequisite left")]
fn decrement_below_self_gate_panics() {
    let manager = inline();
    let job = manager.create_job(JobFlags::NONE, Priority::Normal, ClosureJob::new("job", || {}));
    manager.decrement_dependency(job);
}

#[test]
#[should_panic(expected = "is scheduled and has not completed")]
fn destroying_scheduled_job_panics() {
    let manager = inline();
    let job = manager.create_job(JobFlags::NONE, Priority::Normal, ClosureJob::new("job", || {}));
    manager.schedule(job);
    manager.destroy_entry(job);
}

#[test]
#[should_panic(expected = "SYNC_EVENT")]
fn sync_without_event_panics() {
    let manager = inline();
    let job = manager.create_job(JobFlags::NONE, Priority::Normal, ClosureJob::new("job", || {}));
    manager.sync(job);
}
