//! Helpers for tests that run a container on one process or a thread group.

use std::sync::Arc;
use std::time::Duration;

use shardns_collective::{Communicator, LocalComm, LocalGroup, SelfComm};
use shardns_store::{InMemoryPool, OpenMode};

use crate::config::ConnectorConfig;
use crate::container::Container;
use crate::props::PropertyList;

pub(crate) fn single(name: &str) -> (Arc<InMemoryPool>, Container) {
    single_with(name, ConnectorConfig::default())
}

pub(crate) fn single_with(name: &str, config: ConnectorConfig) -> (Arc<InMemoryPool>, Container) {
    let pool = Arc::new(InMemoryPool::default());
    let container = Container::create(
        pool.as_ref(),
        name,
        Arc::new(SelfComm),
        config,
        &PropertyList::new(),
    )
    .unwrap();
    (pool, container)
}

/// Create container `name` in `pool` on a group of `size` threads and run
/// `body` on each. Results are in rank order.
pub(crate) fn run_group<R, F>(
    pool: &InMemoryPool,
    size: usize,
    name: &str,
    config: ConnectorConfig,
    body: F,
) -> Vec<R>
where
    R: Send,
    F: Fn(Container) -> R + Sync,
{
    on_group(LocalGroup::new(size), |comm| {
        let container =
            Container::create(pool, name, comm, config.clone(), &PropertyList::new()).unwrap();
        body(container)
    })
}

/// Like [`run_group`], but a rank waiting longer than `timeout` for a
/// broadcast fails instead of blocking.
pub(crate) fn run_group_timed<R, F>(
    pool: &InMemoryPool,
    size: usize,
    name: &str,
    timeout: Duration,
    body: F,
) -> Vec<R>
where
    R: Send,
    F: Fn(Container) -> R + Sync,
{
    on_group(LocalGroup::with_timeout(size, timeout), |comm| {
        let container = Container::create(
            pool,
            name,
            comm,
            ConnectorConfig::default(),
            &PropertyList::new(),
        )
        .unwrap();
        body(container)
    })
}

/// Like [`run_group`] for a container that already exists.
pub(crate) fn reopen_group<R, F>(
    pool: &InMemoryPool,
    size: usize,
    name: &str,
    mode: OpenMode,
    config: ConnectorConfig,
    body: F,
) -> Vec<R>
where
    R: Send,
    F: Fn(Container) -> R + Sync,
{
    on_group(LocalGroup::new(size), |comm| {
        let container = Container::open(pool, name, mode, comm, config.clone()).unwrap();
        body(container)
    })
}

fn on_group<R, F>(comms: Vec<LocalComm>, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Arc<dyn Communicator>) -> R + Sync,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(Arc::new(comm)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}
