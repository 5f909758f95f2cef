//! Pool registry with lazy, at-most-once pool construction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use ep_common::PoolConfig;

use crate::pool::{PoolSnapshot, WorkerPool};

/// Lazily builds and caches one [`WorkerPool`] per key.
///
/// Lookups take a lock-free fast path; a miss goes through the creation
/// lock with a re-check, so concurrent first accesses to the same key all
/// observe a single pool instance. Keys without a registered definition
/// get a pool built from the default template, named after the key.
pub struct PoolRegistry {
    pools: DashMap<String, Arc<WorkerPool>>,
    /// Registered definitions in configured order; order is what routing
    /// rule evaluation relies on.
    definitions: IndexMap<String, PoolConfig>,
    metrics_enabled: bool,
    create_lock: Mutex<()>,
}

impl PoolRegistry {
    pub fn new(definitions: Vec<PoolConfig>, metrics_enabled: bool) -> Self {
        let definitions = definitions
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();
        Self {
            pools: DashMap::new(),
            definitions,
            metrics_enabled,
            create_lock: Mutex::new(()),
        }
    }

    /// Registered definitions, in configured order.
    pub fn definitions(&self) -> &IndexMap<String, PoolConfig> {
        &self.definitions
    }

    /// Number of pools built so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Fetch the pool for `key`, building it on first access.
    pub fn get_pool(&self, key: &str) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.get(key) {
            return pool.clone();
        }

        let _guard = self.create_lock.lock();
        // Another caller may have built it while we waited.
        if let Some(pool) = self.pools.get(key) {
            return pool.clone();
        }

        let config = match self.definitions.get(key) {
            Some(config) => config.clone(),
            None => {
                info!(pool = %key, "No definition registered, using default template");
                PoolConfig::named(key)
            }
        };
        let pool = Arc::new(WorkerPool::from_config(config, self.metrics_enabled));
        self.pools.insert(key.to_string(), pool.clone());
        pool
    }

    /// Monitoring snapshots for every pool built so far.
    pub fn snapshot_all(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(|entry| entry.snapshot()).collect()
    }

    /// Shut down every cached pool, giving each up to `timeout` to drain.
    ///
    /// A pool missing its deadline is logged and the sweep continues;
    /// returns whether every pool terminated in time.
    pub fn shutdown_all(&self, timeout: Duration) -> bool {
        let _guard = self.create_lock.lock();
        let mut all_terminated = true;
        for entry in self.pools.iter() {
            if !entry.shutdown(timeout) {
                warn!(pool = %entry.name(), "Pool did not terminate during registry shutdown");
                all_terminated = false;
            }
        }
        info!(
            pools = self.pools.len(),
            clean = all_terminated,
            "Registry shutdown sweep finished"
        );
        all_terminated
    }
}
