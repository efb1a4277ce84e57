// File: testing-framework/src/compiler/mod.rs
//
// Suite Compiler
//
// Binds a finalized SuiteDescriptor to the host runner. Every compiled suite
// gets one generated beforeAll that acquires its topologies and builds the
// run's SuiteContext, and one generated afterAll that releases them. User
// hooks and cases are wrapped so they receive that context.
//
// Registration order on the host:
//
//   beforeAll   [activate topologies] [user hooks...]
//   beforeEach  [user hooks...]
//   afterEach   [user hooks...]
//   cases       test / test_only, with their timeouts
//   afterAll    [user hooks...] [release topologies]

/// Per-run suite state machine
pub mod run_state;

use std::sync::Arc;

use anyhow::Context as _;
use futures::future::FutureExt;
use parking_lot::Mutex;

use crate::host::{HostFn, HostRunner, SuiteScope};
use crate::registry::{HookDescriptor, HookPhase, SuiteDescriptor, SuiteMethod, TopoFieldBinding};
use crate::topology::TopologyResolver;

pub use run_state::SuiteRunState;
use run_state::RunSlot;

/// Name of the generated beforeAll hook
pub const ACTIVATE_HOOK: &str = "activate topologies";
/// Name of the generated afterAll hook
pub const RELEASE_HOOK: &str = "release topologies";

/// Turns suite descriptors into host-runner registrations
pub struct SuiteCompiler {
    resolver: Arc<TopologyResolver>,
    host: Arc<dyn HostRunner>,
}

impl SuiteCompiler {
    /// Create a compiler registering onto `host` and resolving topologies through `resolver`
    pub fn new(resolver: Arc<TopologyResolver>, host: Arc<dyn HostRunner>) -> Self {
        Self { resolver, host }
    }

    /// The resolver generated hooks acquire through
    pub fn resolver(&self) -> &Arc<TopologyResolver> {
        &self.resolver
    }

    /// Register `descriptor` as one host suite.
    ///
    /// The descriptor is consumed; the returned handle only observes the
    /// suite's run state.
    pub fn compile<S>(&self, descriptor: SuiteDescriptor<S>) -> CompiledSuite
    where
        S: Default + Send + 'static,
    {
        let (name, cases, hooks, bindings) = descriptor.into_parts();
        let slot = Arc::new(RunSlot::<S>::new(name.clone()));
        let bindings = Arc::new(bindings);

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Compiling suite '{}': {} case(s), {} hook(s), topologies [{}]",
                name,
                cases.len(),
                hooks.len(),
                bindings
                    .iter()
                    .map(|b| format!("{}={}", b.field_name, b.topo_type_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        self.host.describe(&name, &mut |scope: &mut dyn SuiteScope| {
            scope.before_all(
                ACTIVATE_HOOK,
                activation_hook(slot.clone(), self.resolver.clone(), bindings.clone()),
            );
            for hook in phase_hooks(&hooks, HookPhase::BeforeAll) {
                scope.before_all(&hook.name, user_hook(slot.clone(), hook, false));
            }
            for hook in phase_hooks(&hooks, HookPhase::BeforeEach) {
                scope.before_each(&hook.name, user_hook(slot.clone(), hook, false));
            }
            for hook in phase_hooks(&hooks, HookPhase::AfterEach) {
                scope.after_each(&hook.name, user_hook(slot.clone(), hook, false));
            }
            for case in &cases {
                let body = case_body(slot.clone(), case.method.clone());
                if case.exclusive {
                    scope.test_only(&case.description, body, case.timeout);
                } else {
                    scope.test(&case.description, body, case.timeout);
                }
            }
            for hook in phase_hooks(&hooks, HookPhase::AfterAll) {
                scope.after_all(&hook.name, user_hook(slot.clone(), hook, true));
            }
            scope.after_all(RELEASE_HOOK, release_hook(slot.clone(), self.resolver.clone()));
        });

        CompiledSuite {
            name,
            case_count: cases.len(),
            topology_count: bindings.len(),
            state: slot.state_cell(),
        }
    }
}

/// Handle to a compiled suite
#[derive(Clone)]
pub struct CompiledSuite {
    name: String,
    case_count: usize,
    topology_count: usize,
    state: Arc<Mutex<SuiteRunState>>,
}

impl CompiledSuite {
    /// Suite name as registered on the host
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of registered cases
    pub fn case_count(&self) -> usize {
        self.case_count
    }

    /// Number of topology bindings
    pub fn topology_count(&self) -> usize {
        self.topology_count
    }

    /// Current run state
    pub fn state(&self) -> SuiteRunState {
        *self.state.lock()
    }
}

impl std::fmt::Debug for CompiledSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSuite")
            .field("name", &self.name)
            .field("case_count", &self.case_count)
            .field("topology_count", &self.topology_count)
            .field("state", &self.state())
            .finish()
    }
}

fn phase_hooks<S>(
    hooks: &[HookDescriptor<S>],
    phase: HookPhase,
) -> impl Iterator<Item = &HookDescriptor<S>> + '_ {
    hooks.iter().filter(move |hook| hook.phase == phase)
}

fn activation_hook<S>(
    slot: Arc<RunSlot<S>>,
    resolver: Arc<TopologyResolver>,
    bindings: Arc<Vec<TopoFieldBinding>>,
) -> HostFn
where
    S: Default + Send + 'static,
{
    Arc::new(move || {
        let slot = slot.clone();
        let resolver = resolver.clone();
        let bindings = bindings.clone();
        async move {
            slot.activate(&resolver, &bindings)
                .await
                .map_err(anyhow::Error::from)
        }
        .boxed()
    })
}

fn release_hook<S>(slot: Arc<RunSlot<S>>, resolver: Arc<TopologyResolver>) -> HostFn
where
    S: Default + Send + 'static,
{
    Arc::new(move || {
        let slot = slot.clone();
        let resolver = resolver.clone();
        async move {
            slot.release(&resolver).await;
            anyhow::Ok(())
        }
        .boxed()
    })
}

/// `skip_unbound` hooks are silently skipped when the run never reached Ready
fn user_hook<S>(slot: Arc<RunSlot<S>>, hook: &HookDescriptor<S>, skip_unbound: bool) -> HostFn
where
    S: Default + Send + 'static,
{
    let method = hook.method.clone();
    let name = hook.name.clone();
    let phase = hook.phase;
    Arc::new(move || {
        let slot = slot.clone();
        let method = method.clone();
        let name = name.clone();
        async move {
            let context = match slot.context() {
                Ok(context) => context,
                Err(_) if skip_unbound => {
                    log::debug!(
                        "Skipping {} hook '{}' of '{}': suite never became ready",
                        phase,
                        name,
                        slot.name()
                    );
                    return Ok(());
                }
                Err(err) => return Err(anyhow::Error::from(err)),
            };
            method(context)
                .await
                .with_context(|| format!("{} hook '{}'", phase, name))
        }
        .boxed()
    })
}

fn case_body<S>(slot: Arc<RunSlot<S>>, method: SuiteMethod<S>) -> HostFn
where
    S: Default + Send + 'static,
{
    Arc::new(move || {
        let slot = slot.clone();
        let method = method.clone();
        async move {
            let context = slot.context()?;
            method(context).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SuiteContext;
    use crate::host::{LocalRunner, TestStatus};
    use crate::registry::SuiteBuilder;
    use crate::test_utils::{EventLog, MockTopology};
    use crate::topology::TopologyCatalog;
    use std::time::Duration;

    #[derive(Default)]
    struct PortMirror {
        hits: u32,
    }

    fn setup(topo: Arc<MockTopology>) -> (SuiteCompiler, Arc<LocalRunner>, Arc<TopologyResolver>) {
        let catalog = TopologyCatalog::new();
        catalog.register_shared("lab", topo);
        let resolver = Arc::new(TopologyResolver::new(Arc::new(catalog)));
        let runner = Arc::new(LocalRunner::default());
        let compiler = SuiteCompiler::new(resolver.clone(), runner.clone() as Arc<dyn HostRunner>);
        (compiler, runner, resolver)
    }

    type Ctx = Arc<SuiteContext<PortMirror>>;

    fn recording(
        log: &EventLog,
        event: &'static str,
    ) -> impl Fn(Ctx) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let log = log.clone();
        move |_ctx| {
            log.push(event);
            futures::future::ready(Ok(()))
        }
    }

    #[test]
    fn test_generated_hooks_wrap_user_hooks() {
        let (compiler, runner, _resolver) = setup(Arc::new(MockTopology::new("lab")));
        let log = EventLog::new();

        let descriptor = SuiteBuilder::<PortMirror>::new()
            .before_all("configure mirror", recording(&log, "configure"))
            .after_all("remove mirror", recording(&log, "remove"))
            .before_each("clear counters", recording(&log, "clear"))
            .after_each("dump counters", recording(&log, "dump"))
            .test_with_timeout("mirrors ingress", Duration::from_secs(300), recording(&log, "case"))
            .inject_topo("topo", "lab")
            .finalize("Port mirroring");
        let compiled = compiler.compile(descriptor);

        let outline = &runner.outline()[0];
        assert_eq!(outline.name, "Port mirroring");
        assert_eq!(outline.before_all, vec![ACTIVATE_HOOK, "configure mirror"]);
        assert_eq!(outline.after_all, vec!["remove mirror", RELEASE_HOOK]);
        assert_eq!(outline.before_each, vec!["clear counters"]);
        assert_eq!(outline.after_each, vec!["dump counters"]);
        assert_eq!(outline.cases[0].timeout_ms, 300_000);
        assert_eq!(compiled.topology_count(), 1);
        assert_eq!(compiled.state(), SuiteRunState::Unbound);
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_context_is_shared_across_cases() {
        let log = EventLog::new();
        let topo = Arc::new(MockTopology::new("lab").with_event_log(log.clone()));
        let (compiler, runner, resolver) = setup(topo.clone());

        let descriptor = SuiteBuilder::<PortMirror>::new()
            .inject_topo("topo", "lab")
            .test("first hit", |ctx| async move {
                ctx.state().await.hits += 1;
                Ok(())
            })
            .test("second hit", |ctx| async move {
                let topo = ctx.topology::<MockTopology>("topo")?;
                anyhow::ensure!(topo.activations() == 1, "topology re-activated");
                let hits = ctx.state().await.hits;
                anyhow::ensure!(hits == 1, "state was reset between cases: {}", hits);
                Ok(())
            })
            .finalize("Port mirroring");
        let compiled = compiler.compile(descriptor);

        let report = runner.run().await;

        assert!(report.all_passed(), "{}", report.summary());
        assert_eq!(log.events(), vec!["activate:lab", "deactivate:lab"]);
        assert_eq!(compiled.state(), SuiteRunState::Done);
        assert_eq!(resolver.ref_count(&"lab".into()), 0);
    }

    #[tokio::test]
    async fn test_failed_activation_skips_user_after_all() {
        let topo = Arc::new(MockTopology::new("lab"));
        topo.set_fail_activation(true);
        let (compiler, runner, resolver) = setup(topo.clone());
        let log = EventLog::new();

        let descriptor = SuiteBuilder::<PortMirror>::new()
            .inject_topo("topo", "lab")
            .before_all("configure mirror", recording(&log, "configure"))
            .after_all("remove mirror", recording(&log, "remove"))
            .test("mirrors ingress", recording(&log, "case"))
            .finalize("Port mirroring");
        let compiled = compiler.compile(descriptor);

        let report = runner.run().await;
        let suite = report.suite("Port mirroring").unwrap();

        assert!(log.events().is_empty());
        assert_eq!(suite.cases[0].status, TestStatus::Fail);
        assert_eq!(suite.hook_failures.len(), 1);
        assert_eq!(compiled.state(), SuiteRunState::Failed);
        assert!(resolver.live_topologies().is_empty());
    }
}
