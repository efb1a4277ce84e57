// File: testing-framework/src/topology/mod.rs
//
// Topology Module
//
// A topology is an object representing a hardware test bed: devices, ports,
// CLI/RPC handles and a capture backend. Topologies are expensive to bring up
// and hold scarce sessions, so suites never construct them directly. They
// name a topology type id and the resolver hands out one shared, reference
// counted instance per id.

/// Reference-counted activation of shared topology instances
pub mod resolver;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, Result};

pub use resolver::TopologyResolver;

/// Identity of a topology type, as named by suites and the registration store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopoTypeId(String);

impl TopoTypeId {
    /// Create a topology type id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopoTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopoTypeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TopoTypeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A hardware test bed that can be brought up and torn down.
///
/// The resolver treats instances as opaque beyond these two calls.
/// `activate` runs exactly once per 0→1 reference transition and
/// `deactivate` exactly once per 1→0 transition.
///
/// # Example
///
/// ```rust,ignore
/// struct DualSwitch { dut: CliSession, peer: CliSession }
///
/// #[async_trait]
/// impl Topology for DualSwitch {
///     async fn activate(&self) -> anyhow::Result<()> {
///         self.dut.login().await?;
///         self.peer.login().await
///     }
///
///     async fn deactivate(&self) -> anyhow::Result<()> {
///         self.dut.logout().await?;
///         self.peer.logout().await
///     }
/// }
/// ```
#[async_trait]
pub trait Topology: Send + Sync + 'static {
    /// One-time expensive setup (sessions, capture backends)
    async fn activate(&self) -> AnyResult<()>;

    /// Release everything `activate` acquired
    async fn deactivate(&self) -> AnyResult<()>;
}

/// A constructed topology instance, usable both as `dyn Topology` and as its
/// concrete type.
#[derive(Clone)]
pub struct TopologyHandle {
    id: TopoTypeId,
    topology: Arc<dyn Topology>,
    typed: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl TopologyHandle {
    /// Wrap a concrete instance
    pub fn new<T: Topology>(id: TopoTypeId, instance: Arc<T>) -> Self {
        Self {
            id,
            topology: instance.clone(),
            typed: instance,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Topology type id this instance was built for
    pub fn id(&self) -> &TopoTypeId {
        &self.id
    }

    /// Concrete type name of the instance
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The instance as a lifecycle object
    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    /// The instance as its concrete type, if it is a `T`
    pub fn downcast<T: Topology>(&self) -> Option<Arc<T>> {
        self.typed.clone().downcast::<T>().ok()
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &TopologyHandle) -> bool {
        Arc::ptr_eq(&self.typed, &other.typed)
    }
}

impl fmt::Debug for TopologyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyHandle")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Registration store mapping a topology type id to a concrete factory.
///
/// Called by the resolver on every 0→1 transition. Whether that produces a
/// fresh instance or hands back a long-lived one is the store's policy.
pub trait TopologyStore: Send + Sync {
    /// Produce an instance for `id`
    fn instantiate(&self, id: &TopoTypeId) -> Result<TopologyHandle>;
}

type TopologyFactory = Arc<dyn Fn(&TopoTypeId) -> TopologyHandle + Send + Sync>;

/// In-memory topology registration store
///
/// # Example
///
/// ```rust,ignore
/// let catalog = TopologyCatalog::new();
/// // Fresh instance every time the topology goes 0→1
/// catalog.register("dual-switch", || DualSwitch::from_env());
/// // Same instance on every cycle
/// catalog.register_shared("lab-capture", Arc::new(CaptureBackend::new()));
/// ```
#[derive(Default)]
pub struct TopologyCatalog {
    factories: RwLock<HashMap<TopoTypeId, TopologyFactory>>,
}

impl TopologyCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory building a fresh instance per activation cycle.
    ///
    /// Replaces any previous registration for `id`.
    pub fn register<T, F>(&self, id: impl Into<TopoTypeId>, factory: F)
    where
        T: Topology,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = id.into();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Registering topology '{}' -> {}",
                id,
                std::any::type_name::<T>()
            );
        }
        let factory: TopologyFactory =
            Arc::new(move |id| TopologyHandle::new(id.clone(), Arc::new(factory())));
        self.factories.write().insert(id, factory);
    }

    /// Register one instance handed out on every activation cycle
    pub fn register_shared<T: Topology>(&self, id: impl Into<TopoTypeId>, instance: Arc<T>) {
        let id = id.into();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Registering shared topology '{}' -> {}",
                id,
                std::any::type_name::<T>()
            );
        }
        let factory: TopologyFactory =
            Arc::new(move |id| TopologyHandle::new(id.clone(), instance.clone()));
        self.factories.write().insert(id, factory);
    }

    /// Whether `id` has a registration
    pub fn contains(&self, id: &TopoTypeId) -> bool {
        self.factories.read().contains_key(id)
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<TopoTypeId> {
        let mut ids: Vec<_> = self.factories.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl TopologyStore for TopologyCatalog {
    fn instantiate(&self, id: &TopoTypeId) -> Result<TopologyHandle> {
        let factory = self
            .factories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FrameworkError::UnknownTopology(id.clone()))?;
        Ok(factory(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTopology;

    #[test]
    fn test_catalog_unknown_topology() {
        let catalog = TopologyCatalog::new();
        let err = catalog
            .instantiate(&TopoTypeId::new("missing"))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownTopology(id) if id.as_str() == "missing"));
    }

    #[test]
    fn test_catalog_fresh_instance_per_call() {
        let catalog = TopologyCatalog::new();
        catalog.register("dual-switch", || MockTopology::new("dual-switch"));

        let id = TopoTypeId::new("dual-switch");
        let first = catalog.instantiate(&id).unwrap();
        let second = catalog.instantiate(&id).unwrap();

        assert!(!first.ptr_eq(&second));
        assert_eq!(first.id(), &id);
    }

    #[test]
    fn test_catalog_shared_instance() {
        let catalog = TopologyCatalog::new();
        catalog.register_shared("capture", Arc::new(MockTopology::new("capture")));

        let id = TopoTypeId::new("capture");
        let first = catalog.instantiate(&id).unwrap();
        let second = catalog.instantiate(&id).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(catalog.ids(), vec![id]);
    }

    #[test]
    fn test_handle_downcast() {
        let handle = TopologyHandle::new(
            TopoTypeId::new("single"),
            Arc::new(MockTopology::new("single")),
        );

        let typed = handle.downcast::<MockTopology>().unwrap();
        assert_eq!(typed.name(), "single");
        assert!(handle.type_name().ends_with("MockTopology"));
    }
}
