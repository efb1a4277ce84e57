//! LocalRunner - in-process host runner
//!
//! Collects suites through [`HostRunner::describe`] and executes them on the
//! current tokio runtime.
//!
//! Execution rules per suite:
//! - beforeAll hooks run in order; the first failure fails every case and
//!   skips the remaining beforeAll hooks, all beforeEach/afterEach hooks and
//!   all case bodies
//! - if any case is exclusive, only exclusive cases run (suite-scoped)
//! - per case: beforeEach hooks in order (stop at the first failure), the
//!   body under its timeout, then every afterEach hook
//! - afterAll hooks always run, all of them
//!
//! Hook and case bodies run on spawned tasks. A panic is reported as an
//! assertion failure. A timed-out task is detached, not aborted: in-flight
//! device I/O keeps running and the session may stay busy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinError;

use super::report::{CaseReport, SuiteReport, TestReport};
use super::{HostFn, HostRunner, SuiteScope};
use crate::config::RunnerConfig;
use crate::error::FrameworkError;
use crate::registry::HookPhase;

struct RegisteredHook {
    name: String,
    body: HostFn,
}

struct RegisteredCase {
    name: String,
    body: HostFn,
    timeout: Duration,
    exclusive: bool,
}

struct RegisteredSuite {
    name: String,
    before_all: Vec<RegisteredHook>,
    after_all: Vec<RegisteredHook>,
    before_each: Vec<RegisteredHook>,
    after_each: Vec<RegisteredHook>,
    cases: Vec<RegisteredCase>,
}

impl RegisteredSuite {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            cases: Vec::new(),
        }
    }

    fn hook(name: &str, body: HostFn) -> RegisteredHook {
        RegisteredHook {
            name: name.to_string(),
            body,
        }
    }
}

impl SuiteScope for RegisteredSuite {
    fn before_all(&mut self, name: &str, hook: HostFn) {
        self.before_all.push(Self::hook(name, hook));
    }

    fn after_all(&mut self, name: &str, hook: HostFn) {
        self.after_all.push(Self::hook(name, hook));
    }

    fn before_each(&mut self, name: &str, hook: HostFn) {
        self.before_each.push(Self::hook(name, hook));
    }

    fn after_each(&mut self, name: &str, hook: HostFn) {
        self.after_each.push(Self::hook(name, hook));
    }

    fn test(&mut self, name: &str, body: HostFn, timeout: Duration) {
        self.cases.push(RegisteredCase {
            name: name.to_string(),
            body,
            timeout,
            exclusive: false,
        });
    }

    fn test_only(&mut self, name: &str, body: HostFn, timeout: Duration) {
        self.cases.push(RegisteredCase {
            name: name.to_string(),
            body,
            timeout,
            exclusive: true,
        });
    }
}

/// Registered case, as seen by [`LocalRunner::outline`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutline {
    /// Case name
    pub name: String,
    /// Registered timeout
    pub timeout_ms: u64,
    /// Registered through `test_only`
    pub exclusive: bool,
}

/// Registered suite, as seen by [`LocalRunner::outline`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOutline {
    /// Suite name
    pub name: String,
    /// beforeAll hook names in order
    pub before_all: Vec<String>,
    /// afterAll hook names in order
    pub after_all: Vec<String>,
    /// beforeEach hook names in order
    pub before_each: Vec<String>,
    /// afterEach hook names in order
    pub after_each: Vec<String>,
    /// Cases in order
    pub cases: Vec<CaseOutline>,
}

/// In-process implementation of [`HostRunner`]
///
/// # Example
///
/// ```rust,ignore
/// let runner = Arc::new(LocalRunner::new(RunnerConfig::default()));
/// let compiler = SuiteCompiler::new(resolver, runner.clone());
/// // ... compile suites ...
/// let report = runner.run().await;
/// assert!(report.all_passed());
/// ```
#[derive(Default)]
pub struct LocalRunner {
    config: RunnerConfig,
    suites: Mutex<Vec<Arc<RegisteredSuite>>>,
}

impl LocalRunner {
    /// Create a runner with `config`
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            suites: Mutex::new(Vec::new()),
        }
    }

    /// Runner configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of registered suites
    pub fn suite_count(&self) -> usize {
        self.suites.lock().len()
    }

    /// Everything registered so far, without running it
    pub fn outline(&self) -> Vec<SuiteOutline> {
        let names = |hooks: &[RegisteredHook]| hooks.iter().map(|h| h.name.clone()).collect();
        self.suites
            .lock()
            .iter()
            .map(|suite| SuiteOutline {
                name: suite.name.clone(),
                before_all: names(&suite.before_all),
                after_all: names(&suite.after_all),
                before_each: names(&suite.before_each),
                after_each: names(&suite.after_each),
                cases: suite
                    .cases
                    .iter()
                    .map(|case| CaseOutline {
                        name: case.name.clone(),
                        timeout_ms: case.timeout.as_millis() as u64,
                        exclusive: case.exclusive,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Run every registered suite and collect the results.
    ///
    /// Suites are reported in registration order regardless of
    /// `suite_concurrency`.
    pub async fn run(&self) -> TestReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let suites: Vec<_> = self.suites.lock().clone();
        let concurrency = self.config.suite_concurrency.max(1);

        log::info!(
            "Running {} suite(s), concurrency {}",
            suites.len(),
            concurrency
        );

        let mut results: Vec<(usize, SuiteReport)> = stream::iter(suites.into_iter().enumerate())
            .map(|(index, suite)| async move { (index, self.run_suite(&suite).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut report = TestReport::new(started_at);
        for (_, suite) in results {
            report.add_suite(suite);
        }
        report.set_duration(start.elapsed());

        log::info!(
            "Run finished: {} passed, {} failed, {} timed out, {} skipped",
            report.passed,
            report.failed,
            report.timed_out,
            report.skipped
        );
        report
    }

    async fn run_suite(&self, suite: &RegisteredSuite) -> SuiteReport {
        let mut report = SuiteReport::new(&suite.name);
        let exclusive_only = suite.cases.iter().any(|case| case.exclusive);

        let selected: Vec<bool> = suite
            .cases
            .iter()
            .map(|case| {
                (!exclusive_only || case.exclusive) && self.config.matches(&suite.name, &case.name)
            })
            .collect();

        // Nothing to run: don't bring up the topology at all.
        if !selected.iter().any(|run| *run) {
            for case in &suite.cases {
                report.cases.push(CaseReport::skipped(&case.name, skip_reason(exclusive_only, case)));
            }
            return report;
        }

        log::info!("Suite '{}' started", suite.name);

        let mut setup_failure = None;
        for hook in &suite.before_all {
            if let Err(err) = self.run_hook(HookPhase::BeforeAll, hook).await {
                log::error!("Suite '{}' setup failed: {}", suite.name, err);
                report.hook_failures.push(err.to_string());
                setup_failure = Some(err.to_string());
                break;
            }
        }

        for (case, run) in suite.cases.iter().zip(selected) {
            if !run {
                report.cases.push(CaseReport::skipped(&case.name, skip_reason(exclusive_only, case)));
                continue;
            }
            if let Some(reason) = &setup_failure {
                report.cases.push(CaseReport::failed(
                    &case.name,
                    Duration::ZERO,
                    format!("suite setup failed: {}", reason),
                ));
                continue;
            }
            report.cases.push(self.run_case(suite, case).await);
        }

        for hook in &suite.after_all {
            if let Err(err) = self.run_hook(HookPhase::AfterAll, hook).await {
                log::error!("Suite '{}' teardown failed: {}", suite.name, err);
                report.hook_failures.push(err.to_string());
            }
        }

        log::info!(
            "Suite '{}' finished ({})",
            suite.name,
            if report.all_passed() { "pass" } else { "fail" }
        );
        report
    }

    async fn run_case(&self, suite: &RegisteredSuite, case: &RegisteredCase) -> CaseReport {
        let start = Instant::now();

        let mut outcome = Ok(());
        for hook in &suite.before_each {
            if let Err(err) = self.run_hook(HookPhase::BeforeEach, hook).await {
                outcome = Err(err);
                break;
            }
        }
        if outcome.is_ok() {
            outcome = self.run_body(case).await;
        }
        for hook in &suite.after_each {
            if let Err(err) = self.run_hook(HookPhase::AfterEach, hook).await {
                if outcome.is_ok() {
                    outcome = Err(err);
                } else {
                    log::warn!("Case '{}': {}", case.name, err);
                }
            }
        }

        let elapsed = start.elapsed();
        match outcome {
            Ok(()) => CaseReport::passed(&case.name, elapsed),
            Err(err @ FrameworkError::Timeout { .. }) => {
                CaseReport::timed_out(&case.name, elapsed, err.to_string())
            }
            Err(err) => CaseReport::failed(&case.name, elapsed, err.to_string()),
        }
    }

    async fn run_body(&self, case: &RegisteredCase) -> Result<(), FrameworkError> {
        match run_detached(&case.body, case.timeout).await {
            Ok(()) => Ok(()),
            Err(TaskFailure::TimedOut) => {
                log::warn!(
                    "Case '{}' abandoned after {}ms; its device session may still be busy",
                    case.name,
                    case.timeout.as_millis()
                );
                Err(FrameworkError::Timeout {
                    case: case.name.clone(),
                    timeout: case.timeout,
                })
            }
            Err(TaskFailure::Failed(message)) => Err(FrameworkError::Assertion(message)),
        }
    }

    async fn run_hook(&self, phase: HookPhase, hook: &RegisteredHook) -> Result<(), FrameworkError> {
        let timeout = self.config.hook_timeout();
        run_detached(&hook.body, timeout)
            .await
            .map_err(|failure| FrameworkError::Hook {
                phase: phase.to_string(),
                hook: hook.name.clone(),
                message: match failure {
                    TaskFailure::TimedOut => format!("timed out after {}ms", timeout.as_millis()),
                    TaskFailure::Failed(message) => message,
                },
            })
    }
}

impl HostRunner for LocalRunner {
    fn describe(&self, name: &str, body: &mut dyn FnMut(&mut dyn SuiteScope)) {
        let mut suite = RegisteredSuite::new(name);
        body(&mut suite);
        log::debug!(
            "Registered suite '{}' with {} case(s)",
            name,
            suite.cases.len()
        );
        self.suites.lock().push(Arc::new(suite));
    }
}

enum TaskFailure {
    TimedOut,
    Failed(String),
}

/// Run `body` on its own task. On timeout the task is detached, not aborted.
async fn run_detached(body: &HostFn, timeout: Duration) -> Result<(), TaskFailure> {
    let task = tokio::spawn(body());
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(TaskFailure::Failed(format!("{:#}", err))),
        Ok(Err(join)) => Err(TaskFailure::Failed(panic_message(join))),
        Err(_) => Err(TaskFailure::TimedOut),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

fn skip_reason(exclusive_only: bool, case: &RegisteredCase) -> &'static str {
    if exclusive_only && !case.exclusive {
        "another case in this suite is exclusive"
    } else {
        "filtered out"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestStatus;
    use crate::test_utils::EventLog;
    use futures::future::FutureExt;

    fn step(log: &EventLog, event: &'static str) -> HostFn {
        let log = log.clone();
        Arc::new(move || {
            log.push(event);
            async { anyhow::Ok(()) }.boxed()
        })
    }

    fn failing(log: &EventLog, event: &'static str) -> HostFn {
        let log = log.clone();
        Arc::new(move || {
            log.push(event);
            async move { Err::<(), _>(anyhow::anyhow!("{} failed", event)) }.boxed()
        })
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_hook_ordering() {
        let log = EventLog::new();
        let runner = LocalRunner::default();
        runner.describe("ordering", &mut |scope: &mut dyn SuiteScope| {
            scope.before_all("ba", step(&log, "ba"));
            scope.before_each("be1", step(&log, "be1"));
            scope.before_each("be2", step(&log, "be2"));
            scope.after_each("ae", step(&log, "ae"));
            scope.test("one", step(&log, "one"), MINUTE);
            scope.test("two", step(&log, "two"), MINUTE);
            scope.after_all("aa", step(&log, "aa"));
        });

        let report = runner.run().await;

        assert!(report.all_passed());
        assert_eq!(
            log.events(),
            vec!["ba", "be1", "be2", "one", "ae", "be1", "be2", "two", "ae", "aa"]
        );
    }

    #[tokio::test]
    async fn test_before_all_failure_fails_cases_but_runs_after_all() {
        let log = EventLog::new();
        let runner = LocalRunner::default();
        runner.describe("broken setup", &mut |scope: &mut dyn SuiteScope| {
            scope.before_all("login", failing(&log, "login"));
            scope.before_all("configure", step(&log, "configure"));
            scope.before_each("be", step(&log, "be"));
            scope.test("one", step(&log, "one"), MINUTE);
            scope.after_all("aa", step(&log, "aa"));
        });

        let report = runner.run().await;
        let suite = report.suite("broken setup").unwrap();

        assert_eq!(log.events(), vec!["login", "aa"]);
        assert_eq!(suite.cases[0].status, TestStatus::Fail);
        assert!(suite.cases[0].error.as_deref().unwrap().contains("login failed"));
        assert_eq!(suite.hook_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_exclusive_cases_are_suite_scoped() {
        let log = EventLog::new();
        let runner = LocalRunner::default();
        runner.describe("focused", &mut |scope: &mut dyn SuiteScope| {
            scope.test("normal", step(&log, "normal"), MINUTE);
            scope.test_only("only", step(&log, "only"), MINUTE);
        });
        runner.describe("other", &mut |scope: &mut dyn SuiteScope| {
            scope.test("unaffected", step(&log, "unaffected"), MINUTE);
        });

        let report = runner.run().await;

        assert_eq!(log.events(), vec!["only", "unaffected"]);
        let focused = report.suite("focused").unwrap();
        assert_eq!(focused.case("normal").unwrap().status, TestStatus::Skip);
        assert_eq!(focused.case("only").unwrap().status, TestStatus::Pass);
    }

    #[tokio::test]
    async fn test_panic_is_a_failure_and_after_each_still_runs() {
        let log = EventLog::new();
        let runner = LocalRunner::default();
        let boom: HostFn = Arc::new(|| {
            async {
                let learned = false;
                assert!(learned, "mac not learned");
                anyhow::Ok(())
            }
            .boxed()
        });
        runner.describe("panics", &mut |scope: &mut dyn SuiteScope| {
            scope.after_each("ae", step(&log, "ae"));
            scope.test("boom", boom.clone(), MINUTE);
            scope.test("fine", step(&log, "fine"), MINUTE);
        });

        let report = runner.run().await;
        let suite = report.suite("panics").unwrap();

        assert_eq!(suite.case("boom").unwrap().status, TestStatus::Fail);
        assert!(suite
            .case("boom")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains("mac not learned"));
        assert_eq!(suite.case("fine").unwrap().status, TestStatus::Pass);
        assert_eq!(log.count("ae"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_case() {
        let runner = LocalRunner::default();
        let slow: HostFn = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                anyhow::Ok(())
            }
            .boxed()
        });
        runner.describe("slow", &mut |scope: &mut dyn SuiteScope| {
            scope.test("hangs", slow.clone(), Duration::from_millis(1_000));
        });

        let report = runner.run().await;
        let case = report.suite("slow").unwrap().case("hangs").unwrap().clone();

        assert_eq!(case.status, TestStatus::Timeout);
        assert!(case.error.unwrap().contains("1000ms"));
        assert_eq!(report.timed_out, 1);
    }

    #[tokio::test]
    async fn test_filter_skips_without_running_hooks() {
        let log = EventLog::new();
        let runner = LocalRunner::new(RunnerConfig {
            filter: Some("storm".to_string()),
            ..RunnerConfig::default()
        });
        runner.describe("MAC table", &mut |scope: &mut dyn SuiteScope| {
            scope.before_all("ba", step(&log, "mac-ba"));
            scope.test("learns", step(&log, "learns"), MINUTE);
        });
        runner.describe("storm control", &mut |scope: &mut dyn SuiteScope| {
            scope.test("drops", step(&log, "drops"), MINUTE);
        });

        let report = runner.run().await;

        assert_eq!(log.events(), vec!["drops"]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.passed, 1);
    }

    #[tokio::test]
    async fn test_outline() {
        let log = EventLog::new();
        let runner = LocalRunner::default();
        runner.describe("outlined", &mut |scope: &mut dyn SuiteScope| {
            scope.before_each("be", step(&log, "be"));
            scope.test("a", step(&log, "a"), Duration::from_millis(300_000));
            scope.test_only("b", step(&log, "b"), MINUTE);
        });

        let outline = runner.outline();
        assert_eq!(runner.suite_count(), 1);
        assert_eq!(outline[0].before_each, vec!["be".to_string()]);
        assert_eq!(
            outline[0].cases,
            vec![
                CaseOutline {
                    name: "a".to_string(),
                    timeout_ms: 300_000,
                    exclusive: false
                },
                CaseOutline {
                    name: "b".to_string(),
                    timeout_ms: 60_000,
                    exclusive: true
                },
            ]
        );
        assert!(log.events().is_empty());
    }
}
