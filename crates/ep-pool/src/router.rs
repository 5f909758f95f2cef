//! Rule-based task routing with a first-write-wins resolution cache.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use ep_common::DEFAULT_POOL_NAME;

use crate::task::TaskContext;

/// Extracts the routing input from a task's context.
///
/// The router itself never reads context parameters; what counts as the
/// routing input is entirely the extractor's decision.
pub trait RoutingInputExtractor: Send + Sync {
    fn routing_input(&self, context: &TaskContext) -> String;
}

/// Default extractor: routes by the task's name.
pub struct TaskNameExtractor;

impl RoutingInputExtractor for TaskNameExtractor {
    fn routing_input(&self, context: &TaskContext) -> String {
        context.name.clone()
    }
}

/// Decides whether a routing rule's expression matches an input.
pub trait ExpressionMatcher: Send + Sync {
    fn matches(&self, expression: &str, input: &str) -> bool;
}

/// Exact match, or prefix match when the expression ends in `*`.
pub struct WildcardMatcher;

impl ExpressionMatcher for WildcardMatcher {
    fn matches(&self, expression: &str, input: &str) -> bool {
        match expression.strip_suffix('*') {
            Some(prefix) => input.starts_with(prefix),
            None => expression == input,
        }
    }
}

/// One routing rule: an expression guarding a pool name.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub pool: String,
    pub expression: String,
}

/// Resolves a task context to a pool key.
///
/// Resolution order: blank input short-circuits to the default pool, then
/// the cache, then the ordered rules (first match wins), then the raw
/// input passed through as a literal pool name. Only rule matches are
/// cached; the cache is unbounded and never invalidated, which is fine
/// because the rule set is fixed for the router's lifetime.
pub struct Router {
    rules: Vec<RoutingRule>,
    extractor: Arc<dyn RoutingInputExtractor>,
    matcher: Option<Arc<dyn ExpressionMatcher>>,
    cache: DashMap<String, String>,
}

impl Router {
    /// Router with the given rules, the wildcard matcher, and task-name
    /// routing input.
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self::with_parts(rules, Arc::new(TaskNameExtractor), Some(Arc::new(WildcardMatcher)))
    }

    /// Router that only ever does blank-default and literal passthrough.
    pub fn passthrough() -> Self {
        Self::with_parts(Vec::new(), Arc::new(TaskNameExtractor), None)
    }

    pub fn with_parts(
        rules: Vec<RoutingRule>,
        extractor: Arc<dyn RoutingInputExtractor>,
        matcher: Option<Arc<dyn ExpressionMatcher>>,
    ) -> Self {
        Self {
            rules,
            extractor,
            matcher,
            cache: DashMap::new(),
        }
    }

    /// Resolve the pool key for a task.
    ///
    /// The input is trimmed only to decide blankness; rule matching,
    /// caching, and literal passthrough all see the raw string.
    pub fn resolve(&self, context: &TaskContext) -> String {
        let input = self.extractor.routing_input(context);
        if input.trim().is_empty() {
            return DEFAULT_POOL_NAME.to_string();
        }

        if let Some(cached) = self.cache.get(input.as_str()) {
            return cached.clone();
        }

        let Some(matcher) = &self.matcher else {
            return input;
        };

        for rule in &self.rules {
            if rule.expression.trim().is_empty() {
                continue;
            }
            if matcher.matches(&rule.expression, &input) {
                debug!(input = %input, pool = %rule.pool, expression = %rule.expression, "Routing rule matched");
                // First write wins if another thread raced us here.
                return self
                    .cache
                    .entry(input)
                    .or_insert_with(|| rule.pool.clone())
                    .clone();
            }
        }

        input
    }

    /// Number of cached resolutions.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
