// File: testing-framework/src/host/mod.rs
//
// Host Runner Interface
//
// The compiler targets these primitives, equivalent to a host test engine's
// describe / test / test.only / beforeAll / afterAll / beforeEach /
// afterEach. `LocalRunner` is the in-process implementation shipped with the
// framework.

/// In-process host runner
pub mod local;
/// Run reports (JSON, JUnit XML, text)
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

pub use local::{CaseOutline, LocalRunner, SuiteOutline};
pub use report::{CaseReport, SuiteReport, TestReport, TestStatus};

/// A registered hook or case body; invoked once per execution
pub type HostFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Registration surface of one host suite, available inside `describe`
///
/// Hooks of one phase must run in registration order.
pub trait SuiteScope {
    /// Register a hook run once before the first case
    fn before_all(&mut self, name: &str, hook: HostFn);

    /// Register a hook run once after the last case
    fn after_all(&mut self, name: &str, hook: HostFn);

    /// Register a hook run before every case
    fn before_each(&mut self, name: &str, hook: HostFn);

    /// Register a hook run after every case
    fn after_each(&mut self, name: &str, hook: HostFn);

    /// Register a case
    fn test(&mut self, name: &str, body: HostFn, timeout: Duration);

    /// Register an exclusive case
    fn test_only(&mut self, name: &str, body: HostFn, timeout: Duration);
}

/// Host test-execution engine
pub trait HostRunner: Send + Sync {
    /// Declare a suite; `body` registers its hooks and cases
    fn describe(&self, name: &str, body: &mut dyn FnMut(&mut dyn SuiteScope));
}
