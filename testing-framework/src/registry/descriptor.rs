//! Suite descriptors and the two-phase suite builder
//!
//! Member declarations accumulate into a mutable [`SuiteBuilder`];
//! [`SuiteBuilder::finalize`] produces an immutable [`SuiteDescriptor`] that
//! the compiler consumes exactly once.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::context::SuiteContext;
use crate::topology::TopoTypeId;

/// Timeout applied to cases that do not declare one
pub const DEFAULT_CASE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// A hook or case body, invoked with the suite run's shared context
pub type SuiteMethod<S> =
    Arc<dyn Fn(Arc<SuiteContext<S>>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure into a [`SuiteMethod`]
pub fn suite_method<S, F, Fut>(method: F) -> SuiteMethod<S>
where
    S: Send + 'static,
    F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| method(ctx).boxed())
}

/// Lifecycle phase of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    /// Once before the first case
    BeforeAll,
    /// Once after the last case
    AfterAll,
    /// Before every case
    BeforeEach,
    /// After every case
    AfterEach,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::BeforeAll => "beforeAll",
            HookPhase::AfterAll => "afterAll",
            HookPhase::BeforeEach => "beforeEach",
            HookPhase::AfterEach => "afterEach",
        })
    }
}

/// A declared test case
pub struct CaseDescriptor<S> {
    /// Case body
    pub method: SuiteMethod<S>,
    /// Name reported by the host runner
    pub description: String,
    /// Time after which the host runner abandons the case
    pub timeout: Duration,
    /// Registered through the host runner's exclusivity mechanism
    pub exclusive: bool,
}

impl<S> CaseDescriptor<S> {
    /// Timeout in milliseconds
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl<S> Clone for CaseDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            description: self.description.clone(),
            timeout: self.timeout,
            exclusive: self.exclusive,
        }
    }
}

impl<S> fmt::Debug for CaseDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseDescriptor")
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// A declared lifecycle hook
pub struct HookDescriptor<S> {
    /// Hook body
    pub method: SuiteMethod<S>,
    /// Name used in failure reports
    pub name: String,
    /// When the hook runs
    pub phase: HookPhase,
}

impl<S> Clone for HookDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            name: self.name.clone(),
            phase: self.phase,
        }
    }
}

impl<S> fmt::Debug for HookDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish()
    }
}

/// A suite field that receives a shared topology instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoFieldBinding {
    /// Field name the instance is looked up by
    pub field_name: String,
    /// Topology type to acquire
    pub topo_type_id: TopoTypeId,
}

/// Finalized, immutable description of one suite
pub struct SuiteDescriptor<S> {
    suite_type: TypeId,
    type_name: &'static str,
    description: String,
    cases: Vec<CaseDescriptor<S>>,
    hooks: Vec<HookDescriptor<S>>,
    topo_bindings: Vec<TopoFieldBinding>,
}

impl<S: 'static> SuiteDescriptor<S> {
    /// Identity of the suite state type
    pub fn suite_type(&self) -> TypeId {
        self.suite_type
    }

    /// Name of the suite state type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Suite name
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Cases in declaration order
    pub fn cases(&self) -> &[CaseDescriptor<S>] {
        &self.cases
    }

    /// All hooks in declaration order
    pub fn hooks(&self) -> &[HookDescriptor<S>] {
        &self.hooks
    }

    /// Hooks of one phase, in declaration order
    pub fn hooks_for(&self, phase: HookPhase) -> impl Iterator<Item = &HookDescriptor<S>> {
        self.hooks.iter().filter(move |hook| hook.phase == phase)
    }

    /// Topology bindings in declaration order
    pub fn topo_bindings(&self) -> &[TopoFieldBinding] {
        &self.topo_bindings
    }

    /// Whether any case is exclusive
    pub fn has_exclusive_cases(&self) -> bool {
        self.cases.iter().any(|case| case.exclusive)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        Vec<CaseDescriptor<S>>,
        Vec<HookDescriptor<S>>,
        Vec<TopoFieldBinding>,
    ) {
        (self.description, self.cases, self.hooks, self.topo_bindings)
    }
}

impl<S> fmt::Debug for SuiteDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteDescriptor")
            .field("type_name", &self.type_name)
            .field("description", &self.description)
            .field("cases", &self.cases)
            .field("hooks", &self.hooks)
            .field("topo_bindings", &self.topo_bindings)
            .finish()
    }
}

/// Mutable accumulator for one suite's declarations
///
/// # Example
///
/// ```rust,ignore
/// let descriptor = SuiteBuilder::<StormControl>::new()
///     .inject_topo("topo", "dual-switch")
///     .before_all("enable_storm_control", |ctx| async move { /* ... */ Ok(()) })
///     .test("drops broadcast above threshold", |ctx| async move { /* ... */ Ok(()) })
///     .test_with_timeout("recovers after burst", Duration::from_secs(300), |ctx| async move {
///         Ok(())
///     })
///     .finalize("Storm control");
/// ```
pub struct SuiteBuilder<S> {
    cases: Vec<CaseDescriptor<S>>,
    hooks: Vec<HookDescriptor<S>>,
    topo_bindings: Vec<TopoFieldBinding>,
    _state: PhantomData<fn() -> S>,
}

impl<S: Send + 'static> SuiteBuilder<S> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            hooks: Vec::new(),
            topo_bindings: Vec::new(),
            _state: PhantomData,
        }
    }

    /// Add a beforeAll hook
    pub fn before_all<F, Fut>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_hook(HookPhase::BeforeAll, name, suite_method(method));
        self
    }

    /// Add an afterAll hook
    pub fn after_all<F, Fut>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_hook(HookPhase::AfterAll, name, suite_method(method));
        self
    }

    /// Add a beforeEach hook
    pub fn before_each<F, Fut>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_hook(HookPhase::BeforeEach, name, suite_method(method));
        self
    }

    /// Add an afterEach hook
    pub fn after_each<F, Fut>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_hook(HookPhase::AfterEach, name, suite_method(method));
        self
    }

    /// Add a case with the default 60s timeout
    pub fn test<F, Fut>(self, description: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.test_with_timeout(description, DEFAULT_CASE_TIMEOUT, method)
    }

    /// Add a case with an explicit timeout
    pub fn test_with_timeout<F, Fut>(mut self, description: &str, timeout: Duration, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_case(description, timeout, false, suite_method(method));
        self
    }

    /// Add an exclusive case with the default 60s timeout
    pub fn test_only<F, Fut>(self, description: &str, method: F) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.test_only_with_timeout(description, DEFAULT_CASE_TIMEOUT, method)
    }

    /// Add an exclusive case with an explicit timeout
    pub fn test_only_with_timeout<F, Fut>(
        mut self,
        description: &str,
        timeout: Duration,
        method: F,
    ) -> Self
    where
        F: Fn(Arc<SuiteContext<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_case(description, timeout, true, suite_method(method));
        self
    }

    /// Inject the shared instance of `topo_type_id` into `field_name`
    pub fn inject_topo(mut self, field_name: &str, topo_type_id: impl Into<TopoTypeId>) -> Self {
        self.push_binding(field_name, topo_type_id.into());
        self
    }

    /// Number of cases declared so far
    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    /// Freeze the declarations into a descriptor named `description`
    pub fn finalize(self, description: &str) -> SuiteDescriptor<S> {
        SuiteDescriptor {
            suite_type: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
            description: description.to_string(),
            cases: self.cases,
            hooks: self.hooks,
            topo_bindings: self.topo_bindings,
        }
    }

    pub(crate) fn push_hook(&mut self, phase: HookPhase, name: &str, method: SuiteMethod<S>) {
        self.hooks.push(HookDescriptor {
            method,
            name: name.to_string(),
            phase,
        });
    }

    pub(crate) fn push_case(
        &mut self,
        description: &str,
        timeout: Duration,
        exclusive: bool,
        method: SuiteMethod<S>,
    ) {
        self.cases.push(CaseDescriptor {
            method,
            description: description.to_string(),
            timeout,
            exclusive,
        });
    }

    /// A repeated field name rebinds the field.
    pub(crate) fn push_binding(&mut self, field_name: &str, topo_type_id: TopoTypeId) {
        if let Some(existing) = self
            .topo_bindings
            .iter_mut()
            .find(|binding| binding.field_name == field_name)
        {
            log::warn!(
                "Field '{}' rebound from topology '{}' to '{}'",
                field_name,
                existing.topo_type_id,
                topo_type_id
            );
            existing.topo_type_id = topo_type_id;
            return;
        }
        self.topo_bindings.push(TopoFieldBinding {
            field_name: field_name.to_string(),
            topo_type_id,
        });
    }
}

impl<S: Send + 'static> Default for SuiteBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
