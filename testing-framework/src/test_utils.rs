//! Test utilities
//!
//! A counting mock topology and a shared event log, used by the framework's
//! own tests and handy for suite authors who want to exercise hooks without
//! a physical test bed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::topology::Topology;

/// Ordered log of events shared between mocks, hooks and cases
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Number of events equal to `event`
    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Index of the first occurrence of `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

/// Mock topology counting its lifecycle calls
///
/// Records `activate:<name>` / `deactivate:<name>` into its event log.
#[derive(Debug)]
pub struct MockTopology {
    name: String,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    fail_activation: AtomicBool,
    fail_deactivation: AtomicBool,
    activation_delay: Duration,
    log: EventLog,
}

impl MockTopology {
    /// Create a mock that activates instantly and never fails
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
            fail_activation: AtomicBool::new(false),
            fail_deactivation: AtomicBool::new(false),
            activation_delay: Duration::ZERO,
            log: EventLog::new(),
        }
    }

    /// Record lifecycle events into `log`
    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Sleep this long inside `activate`
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    /// Topology name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make subsequent activations fail (or succeed again)
    pub fn set_fail_activation(&self, fail: bool) {
        self.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent deactivations fail (or succeed again)
    pub fn set_fail_deactivation(&self, fail: bool) {
        self.fail_deactivation.store(fail, Ordering::SeqCst);
    }

    /// Number of `activate` calls so far
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Number of `deactivate` calls so far
    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Topology for MockTopology {
    async fn activate(&self) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if !self.activation_delay.is_zero() {
            tokio::time::sleep(self.activation_delay).await;
        }
        if self.fail_activation.load(Ordering::SeqCst) {
            anyhow::bail!("{}: device session refused", self.name);
        }
        self.log.push(format!("activate:{}", self.name));
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("deactivate:{}", self.name));
        if self.fail_deactivation.load(Ordering::SeqCst) {
            anyhow::bail!("{}: logout timed out", self.name);
        }
        Ok(())
    }
}
