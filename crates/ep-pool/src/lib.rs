//! Elastic worker pools for ElastiPool.
//!
//! The pieces compose bottom-up:
//! - [`WorkerPool`]: OS worker threads draining a bounded job queue, with
//!   elastic sizing between a core and a maximum count, idle keep-alive
//!   retirement, rejection policies, live retuning, and monitoring
//!   snapshots
//! - [`PoolRegistry`]: lazy at-most-once pool construction per key
//! - [`Router`]: rule-based resolution of a task context to a pool key
//! - [`CompositeDispatcher`]: the facade gluing the three together

mod dispatcher;
mod error;
mod pool;
mod registry;
mod router;
mod task;

pub use dispatcher::CompositeDispatcher;
pub use error::{PoolError, Result};
pub use pool::{PoolSnapshot, WorkerPool, WorkerPoolBuilder};
pub use registry::PoolRegistry;
pub use router::{
    ExpressionMatcher, Router, RoutingInputExtractor, RoutingRule, TaskNameExtractor,
    WildcardMatcher,
};
pub use task::{StateObserver, Task, TaskContext, TaskHandle, TaskState};
