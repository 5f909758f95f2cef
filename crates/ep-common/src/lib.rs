use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod logging;

// ============================================================================
// Defaults
// ============================================================================

/// Name of the built-in pool used when no routing rule or configuration
/// selects another one.
pub const DEFAULT_POOL_NAME: &str = "default";

const DEFAULT_KEEP_ALIVE_MS: u64 = 6_000;
const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Default core worker count: one per available CPU.
pub fn default_core_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Default maximum worker count: 2N + 1 for N CPUs.
pub fn default_max_size() -> usize {
    2 * default_core_size() + 1
}

// ============================================================================
// Pool configuration
// ============================================================================

/// Work-queue discipline for a pool.
///
/// `Resizable` supports changing capacity while the pool is live;
/// `Bounded` is fixed at build time and resize requests are ignored
/// with a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Resizable,
    Bounded,
}

impl QueueKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Resizable => "resizable",
            QueueKind::Bounded => "bounded",
        }
    }
}

/// Behavior when a pool cannot accept more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Surface the rejection to the submitter as an error.
    Abort,
    /// Silently drop the task.
    Discard,
    /// Drop the oldest queued task and retry the enqueue once.
    DiscardOldest,
    /// Execute the task on the submitting thread.
    CallerRuns,
}

impl RejectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            RejectionKind::Abort => "abort",
            RejectionKind::Discard => "discard",
            RejectionKind::DiscardOldest => "discard_oldest",
            RejectionKind::CallerRuns => "caller_runs",
        }
    }
}

/// Validation failure raised by [`PoolConfigBuilder::build`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolConfigError {
    #[error("pool name must not be blank")]
    BlankName,

    #[error("maximum pool size must be at least 1, got {0}")]
    ZeroMaxSize(usize),

    #[error("maximum pool size {max} is below core pool size {core}")]
    MaxBelowCore { core: usize, max: usize },

    #[error("keep-alive time must be positive")]
    ZeroKeepAlive,

    #[error("queue capacity must be at least 1, got {0}")]
    ZeroQueueCapacity(usize),
}

/// Resolved, validated parameters for one worker pool.
///
/// Immutable once a pool has been built from it; live retuning goes through
/// the pool itself, not through this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub keep_alive_ms: u64,
    pub queue_kind: QueueKind,
    pub queue_capacity: usize,
    pub rejection: RejectionKind,
    /// Routing expression matched against task routing input; blank means
    /// this pool is only reachable by its literal name.
    #[serde(default)]
    pub expression: String,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// All-defaults configuration under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        PoolConfigBuilder::new()
            .name(name)
            .build()
            .expect("default pool configuration is valid")
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Accumulates pool parameters and validates them at `build()` time.
#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    name: String,
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    queue_kind: QueueKind,
    queue_capacity: usize,
    rejection: RejectionKind,
    expression: String,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_POOL_NAME.to_string(),
            core_size: default_core_size(),
            max_size: default_max_size(),
            keep_alive: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            queue_kind: QueueKind::Resizable,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rejection: RejectionKind::Abort,
            expression: String::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn core_size(mut self, core_size: usize) -> Self {
        self.core_size = core_size;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn queue_kind(mut self, queue_kind: QueueKind) -> Self {
        self.queue_kind = queue_kind;
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn rejection(mut self, rejection: RejectionKind) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    /// Validate and produce the immutable [`PoolConfig`].
    ///
    /// Invalid arguments fail here, never silently clamped.
    pub fn build(self) -> Result<PoolConfig, PoolConfigError> {
        if self.name.trim().is_empty() {
            return Err(PoolConfigError::BlankName);
        }
        if self.max_size == 0 {
            return Err(PoolConfigError::ZeroMaxSize(self.max_size));
        }
        if self.max_size < self.core_size {
            return Err(PoolConfigError::MaxBelowCore {
                core: self.core_size,
                max: self.max_size,
            });
        }
        if self.keep_alive.is_zero() {
            return Err(PoolConfigError::ZeroKeepAlive);
        }
        if self.queue_capacity == 0 {
            return Err(PoolConfigError::ZeroQueueCapacity(self.queue_capacity));
        }

        Ok(PoolConfig {
            name: self.name,
            core_size: self.core_size,
            max_size: self.max_size,
            keep_alive_ms: self.keep_alive.as_millis() as u64,
            queue_kind: self.queue_kind,
            queue_capacity: self.queue_capacity,
            rejection: self.rejection,
            expression: self.expression,
        })
    }
}

// ============================================================================
// Host identity
// ============================================================================

/// Host identity reported in monitoring snapshots.
///
/// Host discovery proper is an external concern; this reads the value the
/// environment supplies and falls back to loopback.
pub fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
