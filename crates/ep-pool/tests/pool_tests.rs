//! Scenario tests for the elastic worker pool.

use ep_common::{QueueKind, RejectionKind};
use ep_pool::{PoolError, Task, TaskState, WorkerPool};
use std::thread;
use std::time::{Duration, Instant};

/// Poll `pred` until it holds or a generous deadline passes.
fn eventually(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// A 1/1/1 pool: one worker, one queue slot, everything else rejected.
fn tiny_pool(rejection: RejectionKind) -> WorkerPool {
    WorkerPool::builder()
        .name("tiny")
        .core_size(1)
        .max_size(1)
        .queue_capacity(1)
        .rejection(rejection)
        .build()
        .unwrap()
}

/// A task that parks on `gate` until the test releases it.
fn blocking_task(name: &str, gate: crossbeam_channel::Receiver<()>) -> Task<u32> {
    Task::new(name, move || {
        gate.recv().ok();
        Ok(1)
    })
}

#[test]
fn single_worker_round_trip() {
    let pool = tiny_pool(RejectionKind::Abort);
    let handle = pool.submit(Task::new("round-trip", || Ok(41 + 1))).unwrap();
    assert_eq!(handle.wait().unwrap(), 42);
    assert!(eventually(|| pool.completed_tasks() == 1));
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn abort_rejection_surfaces_error_and_counts() {
    let pool = tiny_pool(RejectionKind::Abort);
    let (release, gate) = crossbeam_channel::unbounded();

    let h1 = pool.submit(blocking_task("blocker", gate)).unwrap();
    let h2 = pool.submit(Task::new("queued", || Ok(2u32))).unwrap();

    // Worker busy, queue full: abort policy makes this the caller's
    // problem, once per attempt.
    for attempt in 0..3u64 {
        let err = pool.submit(Task::new("overflow", || Ok(3u32))).unwrap_err();
        match err {
            PoolError::Rejected { pool, task } => {
                assert_eq!(pool, "tiny");
                assert_eq!(task, "overflow");
            }
            other => panic!("expected rejection, got {other}"),
        }
        assert_eq!(pool.rejected_tasks(), attempt + 1);
    }

    release.send(()).unwrap();
    assert_eq!(h1.wait().unwrap(), 1);
    assert_eq!(h2.wait().unwrap(), 2);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn discard_policy_absorbs_the_task_silently() {
    let pool = tiny_pool(RejectionKind::Discard);
    let (release, gate) = crossbeam_channel::unbounded();

    let h1 = pool.submit(blocking_task("blocker", gate)).unwrap();
    let _h2 = pool.submit(Task::new("queued", || Ok(2u32))).unwrap();

    // Every saturated submission counts, none of them errors.
    let mut dropped = Vec::new();
    for _ in 0..3 {
        dropped.push(pool.submit(Task::new("dropped", || Ok(3u32))).unwrap());
    }
    assert_eq!(pool.rejected_tasks(), 3);
    // A discarded task never ran; its handle reports the drop instead of
    // blocking forever.
    for handle in &dropped {
        let outcome = handle
            .wait_timeout(Duration::from_millis(50))
            .expect("discarded sender is gone");
        assert!(outcome.unwrap_err().to_string().contains("dropped"));
        assert!(handle.try_wait().expect("still disconnected").is_err());
        assert_eq!(handle.state(), TaskState::Completed);
    }

    release.send(()).unwrap();
    assert_eq!(h1.wait().unwrap(), 1);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn discard_oldest_displaces_the_queued_task() {
    let pool = tiny_pool(RejectionKind::DiscardOldest);
    let (release, gate) = crossbeam_channel::unbounded();

    let h1 = pool.submit(blocking_task("blocker", gate)).unwrap();
    let displaced = pool.submit(Task::new("old", || Ok(2u32))).unwrap();
    let kept = pool.submit(Task::new("new", || Ok(3u32))).unwrap();
    assert_eq!(pool.rejected_tasks(), 1);

    release.send(()).unwrap();
    assert_eq!(h1.wait().unwrap(), 1);
    assert_eq!(kept.wait().unwrap(), 3);
    // The displaced job was dropped without running.
    assert!(displaced.wait().is_err());
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn caller_runs_executes_on_the_submitting_thread() {
    let pool = tiny_pool(RejectionKind::CallerRuns);
    let (release, gate) = crossbeam_channel::unbounded();

    let h1 = pool.submit(blocking_task("blocker", gate)).unwrap();
    let _h2 = pool.submit(Task::new("queued", || Ok(0u32))).unwrap();

    let inline = pool
        .submit(Task::new("inline", || Ok(thread::current().id())))
        .unwrap();
    assert_eq!(pool.rejected_tasks(), 1);
    // Ran inline during submit, so the result is already there.
    let ran_on = inline.try_wait().expect("inline task finished").unwrap();
    assert_eq!(ran_on, thread::current().id());

    release.send(()).unwrap();
    assert_eq!(h1.wait().unwrap(), 1);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn raising_max_size_admits_an_overflow_worker() {
    let pool = tiny_pool(RejectionKind::Abort);
    let (release, gate) = crossbeam_channel::unbounded();

    let h1 = pool.submit(blocking_task("blocker", gate)).unwrap();
    let _h2 = pool.submit(Task::new("queued", || Ok(0u32))).unwrap();

    pool.set_max_size(2).unwrap();
    // With the blocker still parked, the next submission gets its own
    // overflow worker instead of a rejection.
    let h3 = pool.submit(Task::new("overflow", || Ok(3u32))).unwrap();
    assert_eq!(h3.wait().unwrap(), 3);
    assert_eq!(pool.rejected_tasks(), 0);

    release.send(()).unwrap();
    assert_eq!(h1.wait().unwrap(), 1);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn sizing_preconditions_are_enforced() {
    let pool = WorkerPool::builder()
        .name("sized")
        .core_size(2)
        .max_size(4)
        .build()
        .unwrap();

    assert!(matches!(
        pool.set_core_size(5),
        Err(PoolError::MaxBelowCore { core: 5, max: 4 })
    ));
    assert!(matches!(
        pool.set_max_size(1),
        Err(PoolError::MaxBelowCore { core: 2, max: 1 })
    ));
    assert!(matches!(pool.set_max_size(0), Err(PoolError::ZeroMaxSize)));
    assert!(matches!(
        pool.set_keep_alive(Duration::ZERO),
        Err(PoolError::ZeroKeepAlive)
    ));

    pool.set_core_size(0).unwrap();
    pool.set_max_size(1).unwrap();
    assert_eq!(pool.core_size(), 0);
    assert_eq!(pool.max_size(), 1);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn bounded_queue_ignores_capacity_changes() {
    let pool = WorkerPool::builder()
        .name("fixed")
        .queue_kind(QueueKind::Bounded)
        .queue_capacity(10)
        .build()
        .unwrap();

    assert!(!pool.set_queue_capacity(50));
    assert_eq!(pool.queue_capacity(), 10);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn resizable_queue_capacity_changes_apply() {
    let pool = WorkerPool::builder()
        .name("elastic")
        .queue_capacity(10)
        .build()
        .unwrap();

    assert!(pool.set_queue_capacity(50));
    assert_eq!(pool.queue_capacity(), 50);
    assert_eq!(pool.snapshot().queue_capacity, 50);
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn snapshot_reflects_pool_state() {
    let pool = WorkerPool::builder()
        .name("observed")
        .core_size(1)
        .max_size(2)
        .queue_capacity(5)
        .build()
        .unwrap();

    for i in 0..3u32 {
        let handle = pool.submit(Task::new(format!("job-{i}"), move || Ok(i))).unwrap();
        assert_eq!(handle.wait().unwrap(), i);
    }
    assert!(eventually(|| pool.completed_tasks() == 3));

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.name, "observed");
    assert!(!snapshot.host.is_empty());
    assert_eq!(snapshot.core_size, 1);
    assert_eq!(snapshot.max_size, 2);
    assert_eq!(snapshot.completed_tasks, 3);
    assert_eq!(snapshot.active_count, 0);
    assert_eq!(snapshot.queue_size, 0);
    assert_eq!(snapshot.queue_capacity, 5);
    assert_eq!(snapshot.queue_remaining, 5);
    assert_eq!(snapshot.queue_kind, "resizable");
    assert_eq!(snapshot.rejection, "abort");
    assert_eq!(snapshot.rejected_tasks, 0);
    assert_eq!(snapshot.busy_time_ms, None);

    // Snapshots are built for the monitoring surface, so they serialize.
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["name"], "observed");
    assert!(json.get("busy_time_ms").is_none());

    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn busy_time_reported_only_with_metrics_enabled() {
    let pool = WorkerPool::builder()
        .name("timed")
        .core_size(1)
        .max_size(1)
        .metrics_enabled(true)
        .build()
        .unwrap();

    let handle = pool
        .submit(Task::new("sleeper", || {
            thread::sleep(Duration::from_millis(60));
            Ok(())
        }))
        .unwrap();
    handle.wait().unwrap();
    assert!(eventually(|| pool.completed_tasks() == 1));

    let busy = pool.snapshot().busy_time_ms.expect("metrics enabled");
    assert!(busy >= 50, "busy time {busy}ms too small");
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn overflow_workers_retire_after_keep_alive() {
    let pool = WorkerPool::builder()
        .name("shrinking")
        .core_size(1)
        .max_size(2)
        .queue_capacity(1)
        .keep_alive(Duration::from_millis(150))
        .build()
        .unwrap();

    let (release, gate) = crossbeam_channel::unbounded();
    let h1 = pool.submit(blocking_task("blocker", gate.clone())).unwrap();
    let _h2 = pool.submit(Task::new("queued", || Ok(0u32))).unwrap();
    let h3 = pool.submit(blocking_task("overflow", gate)).unwrap();
    assert_eq!(pool.pool_size(), 2);

    release.send(()).unwrap();
    release.send(()).unwrap();
    h1.wait().unwrap();
    h3.wait().unwrap();

    // One worker outlives the keep-alive; the overflow worker does not.
    assert!(eventually(|| pool.pool_size() == 1));
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn shutdown_drains_the_queue_then_refuses_work() {
    let pool = WorkerPool::builder()
        .name("closing")
        .core_size(1)
        .max_size(1)
        .queue_capacity(10)
        .build()
        .unwrap();

    let handles: Vec<_> = (0..5u32)
        .map(|i| {
            pool.submit(Task::new(format!("drain-{i}"), move || {
                thread::sleep(Duration::from_millis(10));
                Ok(i)
            }))
            .unwrap()
        })
        .collect();

    assert!(pool.shutdown(Duration::from_secs(5)));
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.wait().unwrap(), i as u32);
    }

    let err = pool.submit(Task::new("late", || Ok(0u32))).unwrap_err();
    assert!(matches!(err, PoolError::ShutDown(name) if name == "closing"));
}

#[test]
fn queued_task_stays_accepted_when_worker_start_fails() {
    // An absurd stack size makes every worker spawn fail, leaving the
    // queue as the only place a submission can land.
    let pool = WorkerPool::builder()
        .name("starved")
        .core_size(0)
        .max_size(1)
        .queue_capacity(1)
        .worker_stack_size(1 << 60)
        .build()
        .unwrap();

    let handle = pool.submit(Task::new("parked", || Ok(1u32))).unwrap();
    // The job is queued, not lost: still pending, reservation rolled back.
    assert_eq!(pool.queue_len(), 1);
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(handle.state(), TaskState::Completed);
    assert!(handle.wait_timeout(Duration::from_millis(50)).is_none());
    assert!(pool.shutdown(Duration::from_secs(1)));
}

#[test]
fn task_failure_reaches_the_handle() {
    let pool = tiny_pool(RejectionKind::Abort);
    let handle = pool
        .submit(Task::new("failing", || {
            Err::<(), _>(anyhow::anyhow!("backend unavailable"))
        }))
        .unwrap();
    let err = handle.wait().unwrap_err();
    assert!(err.to_string().contains("backend unavailable"));
    assert!(pool.shutdown(Duration::from_secs(2)));
}

#[test]
fn panicking_task_fails_without_killing_the_worker() {
    let pool = tiny_pool(RejectionKind::Abort);
    let handle = pool
        .submit(Task::new("panicker", || -> anyhow::Result<u32> {
            panic!("boom")
        }))
        .unwrap();
    assert!(handle.wait().is_err());

    // The worker survived and keeps serving tasks.
    let next = pool.submit(Task::new("survivor", || Ok(7u32))).unwrap();
    assert_eq!(next.wait().unwrap(), 7);
    assert!(pool.shutdown(Duration::from_secs(2)));
}
