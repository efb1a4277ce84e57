// File: testing-framework/src/registry/mod.rs
//
// Suite Registry
//
// Accumulates hooks, cases and topology bindings per suite type, keyed by the
// `TypeId` of the suite's state type. `generate` freezes a suite and forwards
// it to the compiler. Members registered for a suite type that is never
// generated are orphaned: they are never compiled and their cases never run.
// Orphans are reported by `orphaned_suites()` and `teardown()`, not repaired.

/// Suite, case, hook and binding descriptors
pub mod descriptor;

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::compiler::{CompiledSuite, SuiteCompiler};
use crate::context::SuiteContext;
use crate::error::{FrameworkError, Result};
use crate::topology::TopoTypeId;

pub use descriptor::{
    suite_method, CaseDescriptor, HookDescriptor, HookPhase, SuiteBuilder, SuiteDescriptor,
    SuiteMethod, TopoFieldBinding, DEFAULT_CASE_TIMEOUT,
};

/// In-progress builder for one suite type
struct PendingSuite {
    type_name: &'static str,
    builder: Box<dyn Any + Send>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<TypeId, PendingSuite>,
    generated: HashSet<TypeId>,
}

/// Explicitly constructed suite registry
///
/// # Example
///
/// ```rust,ignore
/// let registry = SuiteRegistry::new(compiler);
///
/// registry.inject_topo::<MacTable>("topo", "dual-switch")?;
/// registry.add_before_each::<MacTable, _, _>("clear_table", clear_table)?;
/// registry.add_test::<MacTable, _, _>("learns source mac", learns_source_mac)?;
/// registry.generate::<MacTable>("MAC table learning")?;
///
/// for orphan in registry.teardown() {
///     eprintln!("{orphan}");
/// }
/// ```
pub struct SuiteRegistry {
    compiler: Arc<SuiteCompiler>,
    state: Mutex<RegistryState>,
}

impl SuiteRegistry {
    /// Create an empty registry forwarding generated suites to `compiler`
    pub fn new(compiler: Arc<SuiteCompiler>) -> Self {
        Self {
            compiler,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Record a beforeAll hook for suite `S`
    pub fn add_before_all<S, F, Fut>(&self, name: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_hook::<S, F, Fut>(HookPhase::BeforeAll, name, method)
    }

    /// Record an afterAll hook for suite `S`
    pub fn add_after_all<S, F, Fut>(&self, name: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_hook::<S, F, Fut>(HookPhase::AfterAll, name, method)
    }

    /// Record a beforeEach hook for suite `S`
    pub fn add_before_each<S, F, Fut>(&self, name: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_hook::<S, F, Fut>(HookPhase::BeforeEach, name, method)
    }

    /// Record an afterEach hook for suite `S`
    pub fn add_after_each<S, F, Fut>(&self, name: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_hook::<S, F, Fut>(HookPhase::AfterEach, name, method)
    }

    /// Record a case for suite `S` with the default timeout
    pub fn add_test<S, F, Fut>(&self, description: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_test_with_timeout::<S, F, Fut>(description, DEFAULT_CASE_TIMEOUT, method)
    }

    /// Record a case for suite `S` with an explicit timeout
    pub fn add_test_with_timeout<S, F, Fut>(
        &self,
        description: &str,
        timeout: Duration,
        method: F,
    ) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_builder::<S>(|builder| {
            builder.push_case(description, timeout, false, suite_method(method))
        })
    }

    /// Record an exclusive case for suite `S` with the default timeout
    pub fn add_test_only<S, F, Fut>(&self, description: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_test_only_with_timeout::<S, F, Fut>(description, DEFAULT_CASE_TIMEOUT, method)
    }

    /// Record an exclusive case for suite `S` with an explicit timeout
    pub fn add_test_only_with_timeout<S, F, Fut>(
        &self,
        description: &str,
        timeout: Duration,
        method: F,
    ) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_builder::<S>(|builder| {
            builder.push_case(description, timeout, true, suite_method(method))
        })
    }

    /// Inject the shared instance of `topo_type_id` into `field_name` of suite `S`
    pub fn inject_topo<S>(&self, field_name: &str, topo_type_id: impl Into<TopoTypeId>) -> Result<()>
    where
        S: Default + Send + 'static,
    {
        let topo_type_id = topo_type_id.into();
        self.with_builder::<S>(|builder| builder.push_binding(field_name, topo_type_id))
    }

    /// Freeze suite `S` under `description` and hand it to the compiler.
    ///
    /// A suite type with no recorded members still generates an empty suite.
    ///
    /// # Errors
    ///
    /// `DuplicateSuite` if `S` was already generated.
    pub fn generate<S>(&self, description: &str) -> Result<CompiledSuite>
    where
        S: Default + Send + 'static,
    {
        let suite_type = TypeId::of::<S>();
        let type_name = std::any::type_name::<S>();

        let builder = {
            let mut state = self.state.lock();
            if !state.generated.insert(suite_type) {
                return Err(FrameworkError::DuplicateSuite(type_name.to_string()));
            }
            match state.pending.remove(&suite_type) {
                Some(pending) => pending
                    .builder
                    .downcast::<SuiteBuilder<S>>()
                    .map(|builder| *builder)
                    .map_err(|_| FrameworkError::Registration {
                        suite: type_name.to_string(),
                    })?,
                None => SuiteBuilder::<S>::new(),
            }
        };

        let descriptor = builder.finalize(description);
        log::debug!(
            "Generated suite '{}' ({}): {} case(s), {} hook(s), {} topology binding(s)",
            description,
            type_name,
            descriptor.cases().len(),
            descriptor.hooks().len(),
            descriptor.topo_bindings().len()
        );
        Ok(self.compiler.compile(descriptor))
    }

    /// Type names of suites with recorded members that were never generated
    pub fn orphaned_suites(&self) -> Vec<String> {
        let mut orphans: Vec<_> = self
            .state
            .lock()
            .pending
            .values()
            .map(|pending| pending.type_name.to_string())
            .collect();
        orphans.sort();
        orphans
    }

    /// Number of suites generated so far
    pub fn generated_count(&self) -> usize {
        self.state.lock().generated.len()
    }

    /// Clear the registry, returning one `Registration` error per orphaned suite
    pub fn teardown(&self) -> Vec<FrameworkError> {
        let drained = {
            let mut state = self.state.lock();
            state.generated.clear();
            std::mem::take(&mut state.pending)
        };

        let mut orphans: Vec<_> = drained
            .into_values()
            .map(|pending| {
                log::warn!(
                    "Suite '{}' has registered members but was never generated; its cases will not run",
                    pending.type_name
                );
                FrameworkError::Registration {
                    suite: pending.type_name.to_string(),
                }
            })
            .collect();
        orphans.sort_by_key(|err| err.to_string());
        orphans
    }

    fn add_hook<S, F, Fut>(&self, phase: HookPhase, name: &str, method: F) -> Result<()>
    where
        S: Default + Send + 'static,
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_builder::<S>(|builder| builder.push_hook(phase, name, suite_method(method)))
    }

    /// Create-or-fetch the in-progress builder of `S` and apply `update` to it
    fn with_builder<S>(&self, update: impl FnOnce(&mut SuiteBuilder<S>)) -> Result<()>
    where
        S: Default + Send + 'static,
    {
        let suite_type = TypeId::of::<S>();
        let type_name = std::any::type_name::<S>();

        let mut state = self.state.lock();
        if state.generated.contains(&suite_type) {
            return Err(FrameworkError::DuplicateSuite(type_name.to_string()));
        }

        let pending = state.pending.entry(suite_type).or_insert_with(|| PendingSuite {
            type_name,
            builder: Box::new(SuiteBuilder::<S>::new()),
        });
        let builder = pending
            .builder
            .downcast_mut::<SuiteBuilder<S>>()
            .ok_or_else(|| FrameworkError::Registration {
                suite: type_name.to_string(),
            })?;
        update(builder);
        Ok(())
    }
}
