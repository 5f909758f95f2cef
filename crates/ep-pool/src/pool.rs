//! Elastic worker pool over OS threads.
//!
//! Scheduling follows the classic elastic discipline: a submission starts a
//! new worker while the pool is below its core size, otherwise it is
//! enqueued, otherwise a non-core worker is started while below the maximum
//! size, otherwise the pool's rejection policy decides. Workers above the
//! core count retire after their cumulative idle time exceeds the live
//! keep-alive. Core size, maximum size, keep-alive, and (for resizable
//! queues) queue capacity can all be retuned while the pool is running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ep_common::{local_host, PoolConfig, PoolConfigError, QueueKind, RejectionKind};
use ep_queue::ResizableQueue;

use crate::error::{PoolError, Result};
use crate::task::{Task, TaskHandle, TaskState};

/// Erased unit of work handed to worker threads.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long a worker blocks on the queue per wait slice. Bounded so that
/// retuning and shutdown are observed promptly.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Outcome of one scheduling attempt, before policy effects reach the
/// submitter.
enum SchedulingOutcome {
    /// The job was placed somewhere it will run (worker, queue, or inline).
    Accepted,
    /// The rejection policy turned the job away; `Some` carries an error
    /// the submitter must see, `None` means the policy absorbed it.
    Rejected(Option<PoolError>),
    /// Scheduling itself broke, e.g. a worker thread could not be spawned.
    Failed(PoolError),
}

/// Work queue disciplines a pool can be built with.
enum WorkQueue {
    /// Capacity may be changed while the pool is live.
    Resizable(ResizableQueue<Job>),
    /// Capacity is fixed at build time; resize requests are logged no-ops.
    Bounded(ResizableQueue<Job>),
}

impl WorkQueue {
    fn new(kind: QueueKind, capacity: usize) -> Self {
        match kind {
            QueueKind::Resizable => WorkQueue::Resizable(ResizableQueue::new(capacity)),
            QueueKind::Bounded => WorkQueue::Bounded(ResizableQueue::new(capacity)),
        }
    }

    fn inner(&self) -> &ResizableQueue<Job> {
        match self {
            WorkQueue::Resizable(q) | WorkQueue::Bounded(q) => q,
        }
    }

    fn kind(&self) -> QueueKind {
        match self {
            WorkQueue::Resizable(_) => QueueKind::Resizable,
            WorkQueue::Bounded(_) => QueueKind::Bounded,
        }
    }
}

struct Shared {
    name: String,
    host: String,
    core_size: AtomicUsize,
    max_size: AtomicUsize,
    keep_alive_ms: AtomicU64,
    queue: WorkQueue,
    rejection: RejectionKind,
    metrics_enabled: bool,
    worker_stack_size: Option<usize>,

    running: AtomicBool,
    worker_count: AtomicUsize,
    worker_seq: AtomicUsize,
    active_count: AtomicUsize,
    largest_size: AtomicUsize,
    completed_tasks: AtomicU64,
    rejected_tasks: AtomicU64,
    busy_nanos: AtomicU64,

    termination_lock: Mutex<()>,
    terminated: Condvar,
}

/// Point-in-time monitoring view of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub host: String,
    pub active_count: usize,
    pub core_size: usize,
    pub max_size: usize,
    pub pool_size: usize,
    pub largest_pool_size: usize,
    pub completed_tasks: u64,
    pub queue_kind: &'static str,
    pub queue_capacity: usize,
    pub queue_size: usize,
    pub queue_remaining: isize,
    pub rejection: &'static str,
    pub rejected_tasks: u64,
    /// Cumulative time workers spent executing tasks; present only when
    /// metrics collection was enabled at build time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_time_ms: Option<u64>,
}

/// An elastic pool of named worker threads draining a bounded job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    /// Build a pool from validated configuration. No workers are started
    /// until the first submission.
    pub fn from_config(config: PoolConfig, metrics_enabled: bool) -> Self {
        Self::with_worker_stack_size(config, metrics_enabled, None)
    }

    fn with_worker_stack_size(
        config: PoolConfig,
        metrics_enabled: bool,
        worker_stack_size: Option<usize>,
    ) -> Self {
        let shared = Arc::new(Shared {
            host: local_host(),
            core_size: AtomicUsize::new(config.core_size),
            max_size: AtomicUsize::new(config.max_size),
            keep_alive_ms: AtomicU64::new(config.keep_alive_ms),
            queue: WorkQueue::new(config.queue_kind, config.queue_capacity),
            rejection: config.rejection,
            metrics_enabled,
            worker_stack_size,
            running: AtomicBool::new(true),
            worker_count: AtomicUsize::new(0),
            worker_seq: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
            largest_size: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            rejected_tasks: AtomicU64::new(0),
            busy_nanos: AtomicU64::new(0),
            termination_lock: Mutex::new(()),
            terminated: Condvar::new(),
            name: config.name,
        });
        info!(
            pool = %shared.name,
            core = config.core_size,
            max = config.max_size,
            queue = shared.queue.kind().name(),
            capacity = config.queue_capacity,
            rejection = config.rejection.name(),
            "Created worker pool"
        );
        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn core_size(&self) -> usize {
        self.shared.core_size.load(Ordering::SeqCst)
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size.load(Ordering::SeqCst)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.shared.keep_alive_ms.load(Ordering::SeqCst))
    }

    /// Number of live worker threads.
    pub fn pool_size(&self) -> usize {
        self.shared.worker_count.load(Ordering::SeqCst)
    }

    /// Number of workers currently executing a task.
    pub fn active_count(&self) -> usize {
        self.shared.active_count.load(Ordering::SeqCst)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks.load(Ordering::SeqCst)
    }

    pub fn rejected_tasks(&self) -> u64 {
        self.shared.rejected_tasks.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.inner().len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.inner().capacity()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Submit a task for execution.
    ///
    /// On acceptance the returned handle delivers the task's outcome once
    /// it has run. An abort-style rejection surfaces as
    /// [`PoolError::Rejected`]; discard-style policies absorb the task and
    /// still return a handle, which then never resolves. In every path the
    /// task is marked `Completed` when this call concludes.
    pub fn submit<V: Send + 'static>(&self, task: Task<V>) -> Result<TaskHandle<V>> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown(shared.name.clone()));
        }

        let Task {
            context,
            work,
            state,
            ..
        } = task;
        let task_name = context.name;
        let (sender, receiver) = crossbeam_channel::bounded(1);

        let cell = state.clone();
        let job_name = task_name.clone();
        let job: Job = Box::new(move || {
            cell.transition(TaskState::Running);
            let outcome = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("task '{job_name}' panicked")));
            match &outcome {
                Ok(_) => cell.transition(TaskState::Success),
                Err(e) => {
                    warn!(task = %job_name, error = %e, "Task failed");
                    cell.transition(TaskState::Failure);
                }
            }
            let _ = sender.send(outcome);
        });

        let result = match shared.schedule(job, &task_name) {
            SchedulingOutcome::Accepted => {
                state.transition(TaskState::Committed);
                Ok(TaskHandle {
                    name: task_name,
                    receiver,
                    state: state.clone(),
                })
            }
            SchedulingOutcome::Rejected(Some(err)) => {
                state.transition(TaskState::Rejected);
                Err(err)
            }
            SchedulingOutcome::Rejected(None) => {
                state.transition(TaskState::Rejected);
                Ok(TaskHandle {
                    name: task_name,
                    receiver,
                    state: state.clone(),
                })
            }
            SchedulingOutcome::Failed(err) => {
                error!(pool = %shared.name, error = %err, "Task scheduling failed");
                state.transition(TaskState::Failure);
                Err(err)
            }
        };
        state.transition(TaskState::Completed);
        result
    }

    /// Retune the core size. Must stay at or below the maximum size.
    pub fn set_core_size(&self, core_size: usize) -> Result<()> {
        let max = self.shared.max_size.load(Ordering::SeqCst);
        if core_size > max {
            return Err(PoolError::MaxBelowCore {
                core: core_size,
                max,
            });
        }
        let old = self.shared.core_size.swap(core_size, Ordering::SeqCst);
        if old == core_size {
            debug!(pool = %self.shared.name, core = core_size, "Core size unchanged");
        } else {
            info!(pool = %self.shared.name, old, new = core_size, "Core size changed");
        }
        Ok(())
    }

    /// Retune the maximum size. Must stay positive and at or above the
    /// core size.
    pub fn set_max_size(&self, max_size: usize) -> Result<()> {
        if max_size == 0 {
            return Err(PoolError::ZeroMaxSize);
        }
        let core = self.shared.core_size.load(Ordering::SeqCst);
        if max_size < core {
            return Err(PoolError::MaxBelowCore {
                core,
                max: max_size,
            });
        }
        let old = self.shared.max_size.swap(max_size, Ordering::SeqCst);
        if old == max_size {
            debug!(pool = %self.shared.name, max = max_size, "Maximum size unchanged");
        } else {
            info!(pool = %self.shared.name, old, new = max_size, "Maximum size changed");
        }
        Ok(())
    }

    /// Retune the idle keep-alive applied to workers above the core count.
    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<()> {
        if keep_alive.is_zero() {
            return Err(PoolError::ZeroKeepAlive);
        }
        let ms = keep_alive.as_millis() as u64;
        let old = self.shared.keep_alive_ms.swap(ms, Ordering::SeqCst);
        if old == ms {
            debug!(pool = %self.shared.name, keep_alive_ms = ms, "Keep-alive unchanged");
        } else {
            info!(pool = %self.shared.name, old_ms = old, new_ms = ms, "Keep-alive changed");
        }
        Ok(())
    }

    /// Retune the queue capacity. Returns whether the change was applied;
    /// a bounded queue ignores the request with a warning.
    pub fn set_queue_capacity(&self, capacity: usize) -> bool {
        match &self.shared.queue {
            WorkQueue::Resizable(queue) => {
                let old = queue.capacity();
                if old == capacity {
                    debug!(pool = %self.shared.name, capacity, "Queue capacity unchanged");
                } else {
                    queue.set_capacity(capacity);
                    info!(pool = %self.shared.name, old, new = capacity, "Queue capacity changed");
                }
                true
            }
            WorkQueue::Bounded(_) => {
                warn!(
                    pool = %self.shared.name,
                    requested = capacity,
                    "Queue capacity is fixed for a bounded queue, ignoring"
                );
                false
            }
        }
    }

    /// Monitoring snapshot of the pool's current state.
    pub fn snapshot(&self) -> PoolSnapshot {
        let shared = &self.shared;
        let queue = shared.queue.inner();
        PoolSnapshot {
            name: shared.name.clone(),
            host: shared.host.clone(),
            active_count: shared.active_count.load(Ordering::SeqCst),
            core_size: shared.core_size.load(Ordering::SeqCst),
            max_size: shared.max_size.load(Ordering::SeqCst),
            pool_size: shared.worker_count.load(Ordering::SeqCst),
            largest_pool_size: shared.largest_size.load(Ordering::SeqCst),
            completed_tasks: shared.completed_tasks.load(Ordering::SeqCst),
            queue_kind: shared.queue.kind().name(),
            queue_capacity: queue.capacity(),
            queue_size: queue.len(),
            queue_remaining: queue.remaining_capacity(),
            rejection: shared.rejection.name(),
            rejected_tasks: shared.rejected_tasks.load(Ordering::SeqCst),
            busy_time_ms: shared
                .metrics_enabled
                .then(|| shared.busy_nanos.load(Ordering::SeqCst) / 1_000_000),
        }
    }

    /// Stop intake, let workers drain the queue, and wait up to `timeout`
    /// for every worker to exit. Returns whether the pool terminated
    /// within the deadline. Idempotent.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        if shared.running.swap(false, Ordering::SeqCst) {
            info!(
                pool = %shared.name,
                queued = shared.queue.inner().len(),
                workers = shared.worker_count.load(Ordering::SeqCst),
                "Shutting down worker pool"
            );
        }

        let deadline = Instant::now() + timeout;
        let mut guard = shared.termination_lock.lock();
        while shared.worker_count.load(Ordering::SeqCst) > 0 {
            if shared.terminated.wait_until(&mut guard, deadline).timed_out()
                && shared.worker_count.load(Ordering::SeqCst) > 0
            {
                warn!(
                    pool = %shared.name,
                    workers = shared.worker_count.load(Ordering::SeqCst),
                    "Worker pool did not terminate within the deadline"
                );
                return false;
            }
        }
        drop(guard);

        let stranded = shared.queue.inner().len();
        if stranded > 0 {
            warn!(pool = %shared.name, stranded, "Worker pool terminated with queued tasks");
        } else {
            info!(pool = %shared.name, "Worker pool terminated");
        }
        true
    }
}

impl PartialEq for WorkerPool {
    fn eq(&self, other: &Self) -> bool {
        self.shared.name == other.shared.name
    }
}

impl Eq for WorkerPool {}

impl std::hash::Hash for WorkerPool {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.shared.name.hash(state);
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("core_size", &self.core_size())
            .field("max_size", &self.max_size())
            .field("pool_size", &self.pool_size())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl Shared {
    /// Place a job: start a core worker, enqueue, start an overflow
    /// worker, or fall through to the rejection policy.
    fn schedule(self: &Arc<Self>, job: Job, task: &str) -> SchedulingOutcome {
        let core = self.core_size.load(Ordering::SeqCst);
        let mut job = job;
        if self.reserve_worker(core) {
            return match self.spawn_worker(Some(job)) {
                Ok(()) => SchedulingOutcome::Accepted,
                Err(err) => SchedulingOutcome::Failed(err),
            };
        }

        match self.queue.inner().offer(job) {
            Ok(()) => {
                // A queued job needs at least one worker alive to drain it.
                if self.worker_count.load(Ordering::SeqCst) == 0
                    && self.reserve_worker(self.max_size.load(Ordering::SeqCst))
                {
                    if let Err(err) = self.spawn_worker(None) {
                        // The job is already queued and stays accepted; it
                        // runs once a later submission starts a worker.
                        error!(
                            pool = %self.name,
                            error = %err,
                            "Failed to start a worker for queued work"
                        );
                    }
                }
                return SchedulingOutcome::Accepted;
            }
            Err(back) => job = back,
        }

        if self.reserve_worker(self.max_size.load(Ordering::SeqCst)) {
            return match self.spawn_worker(Some(job)) {
                Ok(()) => SchedulingOutcome::Accepted,
                Err(err) => SchedulingOutcome::Failed(err),
            };
        }

        self.reject(job, task)
    }

    /// Count-first reservation: claim a worker slot below `ceiling` or
    /// report failure without side effects.
    fn reserve_worker(&self, ceiling: usize) -> bool {
        loop {
            let n = self.worker_count.load(Ordering::SeqCst);
            if n >= ceiling {
                return false;
            }
            if self
                .worker_count
                .compare_exchange(n, n + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.largest_size.fetch_max(n + 1, Ordering::SeqCst);
                return true;
            }
        }
    }

    /// Spawn a worker thread for an already-reserved slot. The reservation
    /// is released on spawn failure.
    fn spawn_worker(self: &Arc<Self>, initial: Option<Job>) -> std::result::Result<(), PoolError> {
        let id = self.worker_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-worker-{}", self.name, id);
        let shared = Arc::clone(self);
        let mut builder = std::thread::Builder::new().name(name.clone());
        if let Some(bytes) = self.worker_stack_size {
            builder = builder.stack_size(bytes);
        }
        let spawned = builder.spawn(move || shared.worker_loop(initial));
        match spawned {
            Ok(_) => {
                debug!(pool = %self.name, worker = %name, "Started worker");
                Ok(())
            }
            Err(source) => {
                self.release_worker();
                Err(PoolError::WorkerSpawn {
                    pool: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn worker_loop(&self, mut initial: Option<Job>) {
        let mut idle = Duration::ZERO;
        loop {
            let job = match initial.take() {
                Some(job) => Some(job),
                None => {
                    let waited = Instant::now();
                    let job = self.queue.inner().poll_timeout(POLL_SLICE);
                    if job.is_none() {
                        idle += waited.elapsed();
                    }
                    job
                }
            };

            match job {
                Some(job) => {
                    idle = Duration::ZERO;
                    self.run_job(job);
                }
                None => {
                    if !self.running.load(Ordering::SeqCst) {
                        // Drained and shutting down.
                        break;
                    }
                    let keep_alive =
                        Duration::from_millis(self.keep_alive_ms.load(Ordering::SeqCst));
                    if idle >= keep_alive && self.try_retire() {
                        debug!(
                            pool = %self.name,
                            idle_ms = idle.as_millis() as u64,
                            "Worker retired after keep-alive"
                        );
                        self.notify_if_terminated();
                        return;
                    }
                }
            }
        }
        self.release_worker();
        self.notify_if_terminated();
    }

    fn run_job(&self, job: Job) {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        let started = self.metrics_enabled.then(Instant::now);
        job();
        if let Some(started) = started {
            self.busy_nanos
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::SeqCst);
        }
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.completed_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Give up this worker's slot only while the pool stays above its
    /// core size.
    fn try_retire(&self) -> bool {
        loop {
            let n = self.worker_count.load(Ordering::SeqCst);
            if n <= self.core_size.load(Ordering::SeqCst) {
                return false;
            }
            if self
                .worker_count
                .compare_exchange(n, n - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release_worker(&self) {
        self.worker_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn notify_if_terminated(&self) {
        if self.worker_count.load(Ordering::SeqCst) == 0 {
            let _guard = self.termination_lock.lock();
            self.terminated.notify_all();
        }
    }

    /// Apply the rejection policy. Every invocation counts against the
    /// pool's rejected total, whatever the policy then does with the job.
    fn reject(self: &Arc<Self>, job: Job, task: &str) -> SchedulingOutcome {
        self.rejected_tasks.fetch_add(1, Ordering::SeqCst);
        match self.rejection {
            RejectionKind::Abort => SchedulingOutcome::Rejected(Some(PoolError::Rejected {
                pool: self.name.clone(),
                task: task.to_string(),
            })),
            RejectionKind::Discard => {
                debug!(pool = %self.name, "Discarded task on saturated pool");
                SchedulingOutcome::Rejected(None)
            }
            RejectionKind::DiscardOldest => {
                if !self.running.load(Ordering::SeqCst) {
                    return SchedulingOutcome::Rejected(None);
                }
                // Make room by dropping the oldest queued job, then retry
                // the enqueue once.
                drop(self.queue.inner().poll());
                match self.queue.inner().offer(job) {
                    Ok(()) => {
                        debug!(pool = %self.name, "Displaced oldest queued task");
                        SchedulingOutcome::Accepted
                    }
                    Err(_) => {
                        debug!(pool = %self.name, "Discarded task, queue refilled during retry");
                        SchedulingOutcome::Rejected(None)
                    }
                }
            }
            RejectionKind::CallerRuns => {
                if !self.running.load(Ordering::SeqCst) {
                    return SchedulingOutcome::Rejected(None);
                }
                debug!(pool = %self.name, "Running task on the submitting thread");
                job();
                SchedulingOutcome::Accepted
            }
        }
    }
}

/// Builder for [`WorkerPool`], delegating parameter validation to
/// [`PoolConfig`]'s builder.
pub struct WorkerPoolBuilder {
    config: ep_common::PoolConfigBuilder,
    metrics_enabled: bool,
    worker_stack_size: Option<usize>,
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPoolBuilder {
    pub fn new() -> Self {
        Self {
            config: ep_common::PoolConfigBuilder::new(),
            metrics_enabled: false,
            worker_stack_size: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.name(name);
        self
    }

    pub fn core_size(mut self, core_size: usize) -> Self {
        self.config = self.config.core_size(core_size);
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config = self.config.max_size(max_size);
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config = self.config.keep_alive(keep_alive);
        self
    }

    pub fn queue_kind(mut self, queue_kind: QueueKind) -> Self {
        self.config = self.config.queue_kind(queue_kind);
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config = self.config.queue_capacity(queue_capacity);
        self
    }

    pub fn rejection(mut self, rejection: RejectionKind) -> Self {
        self.config = self.config.rejection(rejection);
        self
    }

    pub fn metrics_enabled(mut self, metrics_enabled: bool) -> Self {
        self.metrics_enabled = metrics_enabled;
        self
    }

    /// Stack size for worker threads, in bytes. Defaults to the platform
    /// default.
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    pub fn build(self) -> std::result::Result<WorkerPool, PoolConfigError> {
        Ok(WorkerPool::with_worker_stack_size(
            self.config.build()?,
            self.metrics_enabled,
            self.worker_stack_size,
        ))
    }
}
