//! Composite facade: route, fetch the pool, submit.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use ep_config::{AppConfig, ConfigError};

use crate::pool::PoolSnapshot;
use crate::registry::PoolRegistry;
use crate::router::{Router, RoutingInputExtractor, RoutingRule, TaskNameExtractor, WildcardMatcher};
use crate::task::{Task, TaskHandle};
use crate::Result;

/// Single entry point tying the router and the pool registry together.
pub struct CompositeDispatcher {
    router: Router,
    registry: PoolRegistry,
}

impl CompositeDispatcher {
    pub fn new(router: Router, registry: PoolRegistry) -> Self {
        Self { router, registry }
    }

    /// Build a dispatcher from application configuration: rules come from
    /// the pool definitions' routing expressions, in configured order.
    pub fn from_config(config: &AppConfig) -> std::result::Result<Self, ConfigError> {
        let pools = config.resolve_pools()?;
        let rules = pools
            .iter()
            .filter(|pool| !pool.expression.trim().is_empty())
            .map(|pool| RoutingRule {
                pool: pool.name.clone(),
                expression: pool.expression.clone(),
            })
            .collect();
        let router = Router::with_parts(
            rules,
            extractor_for(&config.selector),
            Some(Arc::new(WildcardMatcher)),
        );
        let registry = PoolRegistry::new(pools, config.metrics_enabled);
        Ok(Self { router, registry })
    }

    /// Route the task and submit it to the selected pool.
    pub fn submit<V: Send + 'static>(&self, task: Task<V>) -> Result<TaskHandle<V>> {
        let key = self.router.resolve(task.context());
        let pool = self.registry.get_pool(&key);
        pool.submit(task)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Monitoring snapshots of every pool built so far.
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.registry.snapshot_all()
    }

    /// Shut down every pool; see [`PoolRegistry::shutdown_all`].
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.registry.shutdown_all(timeout)
    }
}

fn extractor_for(selector: &str) -> Arc<dyn RoutingInputExtractor> {
    match selector {
        "default" | "" => Arc::new(TaskNameExtractor),
        other => {
            warn!(selector = %other, "Unknown selector, routing by task name");
            Arc::new(TaskNameExtractor)
        }
    }
}
