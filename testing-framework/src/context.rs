// File: testing-framework/src/context.rs
//
// Suite Context
//
// One context is constructed per suite run and handed to every hook and case
// of that run. It carries the suite's own state (`S`, built from
// `S::default()`) and the topology instances injected into its fields, so
// "assign once in beforeAll, read throughout" works without any
// `this`-style binding.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{FrameworkError, Result};
use crate::topology::{Topology, TopologyHandle};

/// Shared state of one suite run
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct MacTable { learned: Vec<String> }
///
/// SuiteBuilder::<MacTable>::new()
///     .inject_topo("topo", "dual-switch")
///     .before_each("clear_table", |ctx| async move {
///         let topo = ctx.topology::<DualSwitch>("topo")?;
///         topo.dut().run("clear mac address-table dynamic").await?;
///         ctx.state().await.learned.clear();
///         Ok(())
///     })
///     .finalize("MAC table learning");
/// ```
pub struct SuiteContext<S> {
    suite: String,
    topologies: HashMap<String, TopologyHandle>,
    state: Mutex<S>,
}

impl<S: Send> SuiteContext<S> {
    pub(crate) fn new(suite: String, topologies: HashMap<String, TopologyHandle>, state: S) -> Self {
        Self {
            suite,
            topologies,
            state: Mutex::new(state),
        }
    }

    /// Description of the suite this context belongs to
    pub fn suite_name(&self) -> &str {
        &self.suite
    }

    /// Topology injected into `field`, as its concrete type
    ///
    /// # Errors
    ///
    /// - `UnboundTopology` if no topology was injected into `field`
    /// - `TopologyTypeMismatch` if the instance is not a `T`
    pub fn topology<T: Topology>(&self, field: &str) -> Result<Arc<T>> {
        self.topology_handle(field)?
            .downcast::<T>()
            .ok_or_else(|| FrameworkError::TopologyTypeMismatch {
                field: field.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Untyped handle of the topology injected into `field`
    pub fn topology_handle(&self, field: &str) -> Result<&TopologyHandle> {
        self.topologies
            .get(field)
            .ok_or_else(|| FrameworkError::UnboundTopology(field.to_string()))
    }

    /// Names of all fields with an injected topology, sorted
    pub fn topology_fields(&self) -> Vec<&str> {
        let mut fields: Vec<_> = self.topologies.keys().map(String::as_str).collect();
        fields.sort_unstable();
        fields
    }

    /// Lock the suite state
    pub async fn state(&self) -> MutexGuard<'_, S> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTopology;
    use crate::topology::TopoTypeId;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;

    struct OtherTopology;

    #[async_trait]
    impl Topology for OtherTopology {
        async fn activate(&self) -> AnyResult<()> {
            Ok(())
        }

        async fn deactivate(&self) -> AnyResult<()> {
            Ok(())
        }
    }

    fn context() -> SuiteContext<Vec<u32>> {
        let mut topologies = HashMap::new();
        topologies.insert(
            "topo".to_string(),
            TopologyHandle::new(TopoTypeId::new("single"), Arc::new(MockTopology::new("single"))),
        );
        SuiteContext::new("storm control".to_string(), topologies, Vec::new())
    }

    #[tokio::test]
    async fn test_typed_topology_lookup() {
        let ctx = context();
        let topo = ctx.topology::<MockTopology>("topo").unwrap();
        assert_eq!(topo.name(), "single");
        assert_eq!(ctx.topology_fields(), vec!["topo"]);
    }

    #[tokio::test]
    async fn test_unbound_and_mismatched_lookup() {
        let ctx = context();
        assert!(matches!(
            ctx.topology::<MockTopology>("capture"),
            Err(FrameworkError::UnboundTopology(_))
        ));
        assert!(matches!(
            ctx.topology::<OtherTopology>("topo"),
            Err(FrameworkError::TopologyTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_is_shared() {
        let ctx = context();
        ctx.state().await.push(7);
        ctx.state().await.push(9);
        assert_eq!(*ctx.state().await, vec![7, 9]);
        assert_eq!(ctx.suite_name(), "storm control");
    }
}
