//! Topology resolver
//!
//! Maps a topology type id to one shared, reference-counted, lazily
//! activated instance.
//!
//! - `activate()` runs exactly on the 0→1 transition, `deactivate()` exactly
//!   on the 1→0 transition.
//! - The check-then-create sequence runs under a mutex and the pending
//!   activation is recorded before the lock is released, so every concurrent
//!   `acquire()` awaits the same activation.
//! - A failed activation rolls the caller's reference back and is returned to
//!   every caller that awaited it.
//! - Deactivation failures are logged and swallowed.
//!
//! # Example
//!
//! ```rust,ignore
//! let resolver = TopologyResolver::new(Arc::new(catalog));
//! let topo = resolver.acquire(&"dual-switch".into()).await?;
//! // ... run cases against topo ...
//! resolver.release(&"dual-switch".into()).await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::{TopoTypeId, Topology, TopologyHandle, TopologyStore};
use crate::error::{FrameworkError, Result};

type Outcome = std::result::Result<(), Arc<anyhow::Error>>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// Live state for one topology type id
struct TopoInstanceRecord {
    handle: TopologyHandle,
    ref_count: usize,
    /// Activation still in flight
    pending_activation: Option<SharedOutcome>,
    /// Set once the count reached zero; the record is dropped when it completes
    pending_deactivation: Option<SharedOutcome>,
    /// Distinguishes records across 1→0→1 cycles
    generation: u64,
}

#[derive(Default)]
struct RecordTable {
    records: HashMap<TopoTypeId, TopoInstanceRecord>,
    next_generation: u64,
}

/// Process-wide table of shared topology instances
pub struct TopologyResolver {
    store: Arc<dyn TopologyStore>,
    table: Mutex<RecordTable>,
}

impl TopologyResolver {
    /// Create a resolver backed by a registration store
    pub fn new(store: Arc<dyn TopologyStore>) -> Self {
        Self {
            store,
            table: Mutex::new(RecordTable::default()),
        }
    }

    /// Take a reference on `id`, activating it if this is the first one.
    ///
    /// # Errors
    ///
    /// - `UnknownTopology` if the store has no factory for `id`
    /// - `Activation` if the (possibly shared) activation rejects; the
    ///   reference taken by this call is rolled back
    pub async fn acquire(&self, id: &TopoTypeId) -> Result<TopologyHandle> {
        let (handle, pending, generation, created) = {
            let mut guard = self.table.lock();
            let table = &mut *guard;

            let joined = table
                .records
                .get_mut(id)
                .filter(|record| record.ref_count > 0)
                .map(|record| {
                    record.ref_count += 1;
                    (
                        record.handle.clone(),
                        record.pending_activation.clone(),
                        record.generation,
                    )
                });

            match joined {
                Some((handle, pending, generation)) => {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!(
                            "Topology '{}' joined (activation in flight: {})",
                            id,
                            pending.is_some()
                        );
                    }
                    (handle, pending, generation, false)
                }
                None => {
                    // A zero-count record is still deactivating; the new
                    // instance must not come up until it is gone.
                    let draining = table
                        .records
                        .get(id)
                        .and_then(|record| record.pending_deactivation.clone());

                    let handle = self.store.instantiate(id)?;
                    let generation = table.next_generation;
                    table.next_generation += 1;

                    log::debug!("Activating topology '{}' ({})", id, handle.type_name());
                    let activation = activation_future(handle.topology().clone(), draining);
                    table.records.insert(
                        id.clone(),
                        TopoInstanceRecord {
                            handle: handle.clone(),
                            ref_count: 1,
                            pending_activation: Some(activation.clone()),
                            pending_deactivation: None,
                            generation,
                        },
                    );
                    (handle, Some(activation), generation, true)
                }
            }
        };

        let Some(activation) = pending else {
            return Ok(handle);
        };

        match activation.await {
            Ok(()) => {
                let mut table = self.table.lock();
                if let Some(record) = table.records.get_mut(id) {
                    if record.generation == generation {
                        record.pending_activation = None;
                    }
                }
                Ok(handle)
            }
            Err(cause) => {
                self.rollback(id, generation, created);
                Err(FrameworkError::Activation {
                    id: id.clone(),
                    cause,
                })
            }
        }
    }

    /// Drop a reference on `id`, deactivating it if this was the last one.
    ///
    /// Never fails: deactivation errors are logged, and releasing an id with
    /// no live references only logs a warning.
    pub async fn release(&self, id: &TopoTypeId) {
        let (teardown, generation) = {
            let mut table = self.table.lock();
            let Some(record) = table.records.get_mut(id) else {
                log::warn!("Release of topology '{}' without a matching acquire", id);
                return;
            };
            if record.ref_count == 0 {
                log::warn!("Release of topology '{}' which is already draining", id);
                return;
            }

            record.ref_count -= 1;
            if record.ref_count > 0 {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!(
                        "Topology '{}' released, {} holder(s) remain",
                        id,
                        record.ref_count
                    );
                }
                return;
            }

            log::debug!("Deactivating topology '{}'", id);
            let teardown = deactivation_future(
                record.handle.topology().clone(),
                record.pending_activation.take(),
            );
            record.pending_deactivation = Some(teardown.clone());
            (teardown, record.generation)
        };

        if let Err(cause) = teardown.await {
            log::error!("Topology '{}' failed to deactivate: {:#}", id, cause);
        }

        let mut table = self.table.lock();
        let drained = table
            .records
            .get(id)
            .is_some_and(|record| record.generation == generation && record.ref_count == 0);
        if drained {
            table.records.remove(id);
        }
    }

    /// Current number of holders of `id`
    pub fn ref_count(&self, id: &TopoTypeId) -> usize {
        self.table
            .lock()
            .records
            .get(id)
            .map_or(0, |record| record.ref_count)
    }

    /// Whether `id` currently has at least one holder
    pub fn is_live(&self, id: &TopoTypeId) -> bool {
        self.ref_count(id) > 0
    }

    /// Ids with at least one holder, sorted
    pub fn live_topologies(&self) -> Vec<TopoTypeId> {
        let mut ids: Vec<_> = self
            .table
            .lock()
            .records
            .iter()
            .filter(|(_, record)| record.ref_count > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn rollback(&self, id: &TopoTypeId, generation: u64, created: bool) {
        let mut table = self.table.lock();
        let Some(record) = table.records.get_mut(id) else {
            return;
        };
        if record.generation != generation {
            return;
        }

        record.ref_count = record.ref_count.saturating_sub(1);
        if created || record.ref_count == 0 {
            table.records.remove(id);
            log::debug!("Topology '{}' record cleared after failed activation", id);
        }
    }
}

fn activation_future(
    topology: Arc<dyn Topology>,
    draining: Option<SharedOutcome>,
) -> SharedOutcome {
    async move {
        if let Some(previous) = draining {
            // Its failure was already logged by the releasing caller.
            let _ = previous.await;
        }
        topology.activate().await.map_err(Arc::new)
    }
    .boxed()
    .shared()
}

fn deactivation_future(
    topology: Arc<dyn Topology>,
    activation: Option<SharedOutcome>,
) -> SharedOutcome {
    async move {
        if let Some(activation) = activation {
            let _ = activation.await;
        }
        topology.deactivate().await.map_err(Arc::new)
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTopology;
    use crate::topology::TopologyCatalog;
    use std::time::Duration;

    fn resolver_with(id: &str, topo: Arc<MockTopology>) -> TopologyResolver {
        let catalog = TopologyCatalog::new();
        catalog.register_shared(id, topo);
        TopologyResolver::new(Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_double_acquire_activates_once() {
        let topo = Arc::new(MockTopology::new("t"));
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        let first = resolver.acquire(&id).await.unwrap();
        let second = resolver.acquire(&id).await.unwrap();

        assert_eq!(topo.activations(), 1);
        assert!(first.ptr_eq(&second));
        assert_eq!(resolver.ref_count(&id), 2);
    }

    #[tokio::test]
    async fn test_deactivate_only_on_last_release() {
        let topo = Arc::new(MockTopology::new("t"));
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        resolver.acquire(&id).await.unwrap();
        resolver.acquire(&id).await.unwrap();

        resolver.release(&id).await;
        assert_eq!(topo.deactivations(), 0);
        assert_eq!(resolver.ref_count(&id), 1);

        resolver.release(&id).await;
        assert_eq!(topo.deactivations(), 1);
        assert_eq!(resolver.ref_count(&id), 0);
        assert!(resolver.live_topologies().is_empty());
    }

    #[tokio::test]
    async fn test_failed_activation_rolls_back() {
        let topo = Arc::new(MockTopology::new("t"));
        topo.set_fail_activation(true);
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        let err = resolver.acquire(&id).await.unwrap_err();
        assert!(err.is_activation());
        assert!(err.to_string().contains("device session refused"));
        assert_eq!(resolver.ref_count(&id), 0);
        assert_eq!(topo.deactivations(), 0);

        // A later acquire starts a fresh activation
        topo.set_fail_activation(false);
        resolver.acquire(&id).await.unwrap();
        assert_eq!(topo.activations(), 2);
        assert_eq!(resolver.ref_count(&id), 1);
    }

    #[tokio::test]
    async fn test_failed_activation_preserves_other_topologies() {
        let catalog = TopologyCatalog::new();
        let good = Arc::new(MockTopology::new("good"));
        let bad = Arc::new(MockTopology::new("bad"));
        bad.set_fail_activation(true);
        catalog.register_shared("good", good.clone());
        catalog.register_shared("bad", bad.clone());
        let resolver = TopologyResolver::new(Arc::new(catalog));

        let good_id = TopoTypeId::new("good");
        resolver.acquire(&good_id).await.unwrap();
        assert!(resolver.acquire(&"bad".into()).await.is_err());

        assert_eq!(resolver.ref_count(&good_id), 1);
        assert_eq!(resolver.live_topologies(), vec![good_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_shares_activation() {
        let topo = Arc::new(MockTopology::new("t").with_activation_delay(Duration::from_secs(5)));
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        let (a, b) = tokio::join!(resolver.acquire(&id), resolver.acquire(&id));

        assert_eq!(topo.activations(), 1);
        assert!(a.unwrap().ptr_eq(&b.unwrap()));
        assert_eq!(resolver.ref_count(&id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_shares_failure() {
        let topo = Arc::new(MockTopology::new("t").with_activation_delay(Duration::from_secs(5)));
        topo.set_fail_activation(true);
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        let (a, b) = tokio::join!(resolver.acquire(&id), resolver.acquire(&id));

        assert!(a.unwrap_err().is_activation());
        assert!(b.unwrap_err().is_activation());
        assert_eq!(topo.activations(), 1);
        assert_eq!(resolver.ref_count(&id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_acquire_race_across_threads() {
        let topo = Arc::new(MockTopology::new("t").with_activation_delay(Duration::from_millis(20)));
        let resolver = Arc::new(resolver_with("t", topo.clone()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(async move {
                resolver.acquire(&TopoTypeId::new("t")).await.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let id = TopoTypeId::new("t");
        assert_eq!(topo.activations(), 1);
        assert_eq!(resolver.ref_count(&id), 16);

        for _ in 0..16 {
            resolver.release(&id).await;
        }
        assert_eq!(topo.deactivations(), 1);
    }

    #[tokio::test]
    async fn test_deactivation_failure_is_swallowed() {
        let topo = Arc::new(MockTopology::new("t"));
        topo.set_fail_deactivation(true);
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        resolver.acquire(&id).await.unwrap();
        resolver.release(&id).await;

        assert_eq!(topo.deactivations(), 1);
        assert!(!resolver.is_live(&id));

        // Next cycle activates again
        resolver.acquire(&id).await.unwrap();
        assert_eq!(topo.activations(), 2);
    }

    #[tokio::test]
    async fn test_unbalanced_release_is_ignored() {
        let topo = Arc::new(MockTopology::new("t"));
        let resolver = resolver_with("t", topo.clone());
        let id = TopoTypeId::new("t");

        resolver.release(&id).await;
        assert_eq!(topo.deactivations(), 0);
        assert_eq!(resolver.ref_count(&id), 0);
    }

    #[tokio::test]
    async fn test_unknown_topology() {
        let resolver = TopologyResolver::new(Arc::new(TopologyCatalog::new()));
        let err = resolver.acquire(&"nope".into()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownTopology(_)));
    }

    #[tokio::test]
    async fn test_fresh_instance_per_cycle() {
        let catalog = TopologyCatalog::new();
        catalog.register("t", || MockTopology::new("t"));
        let resolver = TopologyResolver::new(Arc::new(catalog));
        let id = TopoTypeId::new("t");

        let first = resolver.acquire(&id).await.unwrap();
        resolver.release(&id).await;
        let second = resolver.acquire(&id).await.unwrap();

        assert!(!first.ptr_eq(&second));
        assert_eq!(first.downcast::<MockTopology>().unwrap().deactivations(), 1);
        assert_eq!(second.downcast::<MockTopology>().unwrap().activations(), 1);
    }
}
