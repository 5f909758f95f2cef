//! Pool error types.

use thiserror::Error;

/// Errors surfaced by worker pools and the dispatcher built on them.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool could not accept the task and its rejection policy makes
    /// that the submitter's problem.
    #[error("pool '{pool}' rejected task '{task}'")]
    Rejected { pool: String, task: String },

    #[error("pool '{0}' is shut down")]
    ShutDown(String),

    #[error("maximum pool size must be at least 1")]
    ZeroMaxSize,

    #[error("maximum pool size {max} is below core pool size {core}")]
    MaxBelowCore { core: usize, max: usize },

    #[error("keep-alive time must be positive")]
    ZeroKeepAlive,

    #[error("failed to spawn worker thread for pool '{pool}': {source}")]
    WorkerSpawn {
        pool: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PoolError>;
