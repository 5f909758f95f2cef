//! Tasks, their lifecycle states, and result handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a submitted task.
///
/// Transitions are bookkeeping only: nothing in the runtime waits on a
/// state, and a transition never fails. `Completed` marks the end of the
/// submission attempt, not of execution; a committed task moves through
/// `Running` and `Success`/`Failure` on its worker thread independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    /// Accepted by a pool (started a worker, enqueued, or ran inline).
    Committed = 1,
    /// Turned away by the pool's rejection policy.
    Rejected = 2,
    Running = 3,
    Success = 4,
    Failure = 5,
    /// The submission attempt has concluded, whatever the outcome.
    Completed = 6,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Committed,
            2 => TaskState::Rejected,
            3 => TaskState::Running,
            4 => TaskState::Success,
            5 => TaskState::Failure,
            _ => TaskState::Completed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Committed => "committed",
            TaskState::Rejected => "rejected",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
            TaskState::Completed => "completed",
        }
    }
}

/// Observer invoked on every task state transition.
///
/// Runs on whichever thread performs the transition, so implementations
/// must be quick and must not block.
pub trait StateObserver: Send + Sync {
    fn on_transition(&self, task: &str, from: TaskState, to: TaskState);
}

/// Shared atomic cell holding a task's current state.
pub(crate) struct StateCell {
    name: String,
    state: AtomicU8,
    observer: Option<Arc<dyn StateObserver>>,
}

impl StateCell {
    fn new(name: String, observer: Option<Arc<dyn StateObserver>>) -> Self {
        Self {
            name,
            state: AtomicU8::new(TaskState::Created as u8),
            observer,
        }
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn transition(&self, to: TaskState) {
        let from = TaskState::from_u8(self.state.swap(to as u8, Ordering::SeqCst));
        if let Some(observer) = &self.observer {
            observer.on_transition(&self.name, from, to);
        }
    }
}

/// Routing-relevant task metadata, separate from the work itself.
///
/// The runtime never interprets `parameters`; they exist for custom
/// routing-input extractors and observers.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub name: String,
    pub parameters: HashMap<String, String>,
}

impl TaskContext {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: HashMap::new(),
        }
    }
}

/// A unit of work plus its context and lifecycle cell.
pub struct Task<V> {
    pub(crate) context: TaskContext,
    pub(crate) work: Box<dyn FnOnce() -> anyhow::Result<V> + Send + 'static>,
    pub(crate) state: Arc<StateCell>,
}

impl<V> Task<V> {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<V> + Send + 'static,
    {
        let context = TaskContext::named(name);
        let state = Arc::new(StateCell::new(context.name.clone(), None));
        Self {
            context,
            work: Box::new(work),
            state,
        }
    }

    /// Attach a routing parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.parameters.insert(key.into(), value.into());
        self
    }

    /// Attach a lifecycle observer. Replaces any previous one.
    pub fn observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.state = Arc::new(StateCell::new(self.context.name.clone(), Some(observer)));
        self
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }
}

/// Handle to a submitted task's outcome.
///
/// Backed by a one-shot channel. A task absorbed by a discard policy is
/// dropped without ever running, so its sender disconnects and every wait
/// variant reports a dropped-task error instead of blocking forever.
pub struct TaskHandle<V> {
    pub(crate) name: String,
    pub(crate) receiver: crossbeam_channel::Receiver<anyhow::Result<V>>,
    pub(crate) state: Arc<StateCell>,
}

impl<V> TaskHandle<V> {
    /// Block until the task finishes and return its outcome.
    pub fn wait(self) -> anyhow::Result<V> {
        match self.receiver.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!(
                "task '{}' was dropped before producing a result",
                self.name
            )),
        }
    }

    /// Like [`wait`](Self::wait) with a deadline; `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<anyhow::Result<V>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(anyhow::anyhow!(
                "task '{}' was dropped before producing a result",
                self.name
            ))),
        }
    }

    /// Non-blocking probe; `None` if the task is still pending.
    pub fn try_wait(&self) -> Option<anyhow::Result<V>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => Some(Err(anyhow::anyhow!(
                "task '{}' was dropped before producing a result",
                self.name
            ))),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<V> fmt::Debug for TaskHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish()
    }
}
