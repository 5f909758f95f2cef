//! Tests for lazy, at-most-once pool construction.

use ep_common::{default_core_size, PoolConfig};
use ep_pool::{PoolError, PoolRegistry, Task};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn custom_definition(name: &str, core: usize, max: usize) -> PoolConfig {
    PoolConfig::builder()
        .name(name)
        .core_size(core)
        .max_size(max)
        .build()
        .unwrap()
}

#[test]
fn concurrent_first_access_builds_exactly_one_pool() {
    const RACERS: usize = 8;

    let registry = Arc::new(PoolRegistry::new(Vec::new(), false));
    let barrier = Arc::new(std::sync::Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get_pool("contended")
            })
        })
        .collect();

    let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for pool in &pools[1..] {
        assert!(Arc::ptr_eq(&pools[0], pool));
    }
    assert_eq!(registry.pool_count(), 1);
    assert!(registry.shutdown_all(Duration::from_secs(2)));
}

#[test]
fn unregistered_key_gets_a_default_template_pool() {
    let registry = PoolRegistry::new(Vec::new(), false);
    let pool = registry.get_pool("adhoc");
    assert_eq!(pool.name(), "adhoc");
    assert_eq!(pool.core_size(), default_core_size());
    assert!(registry.shutdown_all(Duration::from_secs(2)));
}

#[test]
fn registered_definition_shapes_the_pool() {
    let registry = PoolRegistry::new(vec![custom_definition("emails", 2, 6)], false);
    let pool = registry.get_pool("emails");
    assert_eq!(pool.core_size(), 2);
    assert_eq!(pool.max_size(), 6);

    // Repeat lookups hit the cache.
    assert!(Arc::ptr_eq(&pool, &registry.get_pool("emails")));
    assert_eq!(registry.pool_count(), 1);
    assert!(registry.shutdown_all(Duration::from_secs(2)));
}

#[test]
fn definitions_keep_configured_order() {
    let registry = PoolRegistry::new(
        vec![
            custom_definition("first", 1, 2),
            custom_definition("second", 1, 2),
            custom_definition("third", 1, 2),
        ],
        false,
    );
    let names: Vec<_> = registry.definitions().keys().cloned().collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn shutdown_all_sweeps_every_pool() {
    let registry = PoolRegistry::new(Vec::new(), false);
    for key in ["a", "b", "c"] {
        let pool = registry.get_pool(key);
        let handle = pool.submit(Task::new("work", || Ok(()))).unwrap();
        handle.wait().unwrap();
    }

    assert!(registry.shutdown_all(Duration::from_secs(5)));
    let err = registry
        .get_pool("a")
        .submit(Task::new("late", || Ok(())))
        .unwrap_err();
    assert!(matches!(err, PoolError::ShutDown(_)));
}

#[test]
fn snapshot_all_covers_built_pools() {
    let registry = PoolRegistry::new(vec![custom_definition("emails", 1, 2)], false);
    registry.get_pool("emails");
    registry.get_pool("reports");

    let snapshots = registry.snapshot_all();
    let mut names: Vec<_> = snapshots.iter().map(|s| s.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["emails", "reports"]);
    assert!(registry.shutdown_all(Duration::from_secs(2)));
}
