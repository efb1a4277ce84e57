//! Per-run suite state
//!
//! ```text
//! Unbound ──► Activating ──► Ready ──► Releasing ──► Done
//!                 │
//!                 └──────► Failed
//! ```
//!
//! A suite may be run again from `Done` or `Failed`; each run builds a fresh
//! [`SuiteContext`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::SuiteContext;
use crate::error::{FrameworkError, Result};
use crate::registry::TopoFieldBinding;
use crate::topology::{TopoTypeId, TopologyResolver};

/// Lifecycle state of one suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteRunState {
    /// Compiled, not started
    Unbound,
    /// Topology acquisition in flight
    Activating,
    /// Context published; cases may run
    Ready,
    /// Topology release in flight
    Releasing,
    /// Released after a successful activation
    Done,
    /// Topology acquisition failed
    Failed,
}

impl fmt::Display for SuiteRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuiteRunState::Unbound => "unbound",
            SuiteRunState::Activating => "activating",
            SuiteRunState::Ready => "ready",
            SuiteRunState::Releasing => "releasing",
            SuiteRunState::Done => "done",
            SuiteRunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct LiveRun<S> {
    context: Arc<SuiteContext<S>>,
    acquired: Vec<TopoTypeId>,
}

struct SlotInner<S> {
    /// Bumped by every activation; a finishing activation only publishes
    /// if it is still the current one.
    epoch: u64,
    /// Epoch of the activation in flight, cleared when it is abandoned
    activating: Option<u64>,
    live: Option<LiveRun<S>>,
}

/// Shared between every generated hook and case of one compiled suite
pub(crate) struct RunSlot<S> {
    name: String,
    state: Arc<Mutex<SuiteRunState>>,
    inner: Mutex<SlotInner<S>>,
}

impl<S: Default + Send + 'static> RunSlot<S> {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(SuiteRunState::Unbound)),
            inner: Mutex::new(SlotInner {
                epoch: 0,
                activating: None,
                live: None,
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state_cell(&self) -> Arc<Mutex<SuiteRunState>> {
        self.state.clone()
    }

    fn transition(&self, next: SuiteRunState) {
        let mut state = self.state.lock();
        log::debug!("Suite '{}': {} -> {}", self.name, *state, next);
        *state = next;
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().activating == Some(epoch)
    }

    /// Acquire every binding in order and publish a fresh context.
    ///
    /// On failure the bindings acquired so far are released in reverse order.
    /// The same happens when the run is released (or superseded by a newer
    /// activation) before acquisition completes; nothing is published then.
    pub(crate) async fn activate(
        &self,
        resolver: &TopologyResolver,
        bindings: &[TopoFieldBinding],
    ) -> Result<()> {
        let epoch = {
            let mut inner = self.inner.lock();
            let epoch = inner.epoch + 1;
            inner.epoch = epoch;
            inner.activating = Some(epoch);
            epoch
        };
        self.transition(SuiteRunState::Activating);

        let mut topologies = HashMap::with_capacity(bindings.len());
        let mut acquired = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match resolver.acquire(&binding.topo_type_id).await {
                Ok(handle) => {
                    topologies.insert(binding.field_name.clone(), handle);
                    acquired.push(binding.topo_type_id.clone());
                }
                Err(err) => {
                    log::error!(
                        "Suite '{}' could not bind '{}': {}",
                        self.name,
                        binding.field_name,
                        err
                    );
                    self.abort(resolver, epoch, &acquired).await;
                    return Err(err);
                }
            }
            if !self.is_current(epoch) {
                break;
            }
        }

        let context = Arc::new(SuiteContext::new(self.name.clone(), topologies, S::default()));
        let replaced = {
            let mut inner = self.inner.lock();
            if inner.activating != Some(epoch) {
                None
            } else {
                inner.activating = None;
                Some(inner.live.replace(LiveRun {
                    context,
                    acquired: acquired.clone(),
                }))
            }
        };

        match replaced {
            None => {
                log::warn!(
                    "Suite '{}' was released while activating; returning its topologies",
                    self.name
                );
                self.abort(resolver, epoch, &acquired).await;
                Err(FrameworkError::ActivationAbandoned(self.name.clone()))
            }
            Some(previous) => {
                self.transition(SuiteRunState::Ready);
                if let Some(previous) = previous {
                    log::warn!(
                        "Suite '{}' activated again without being released; releasing the previous run",
                        self.name
                    );
                    release_all(resolver, &previous.acquired).await;
                }
                Ok(())
            }
        }
    }

    /// Roll back a failed or abandoned activation
    async fn abort(&self, resolver: &TopologyResolver, epoch: u64, acquired: &[TopoTypeId]) {
        release_all(resolver, acquired).await;
        let superseded = {
            let mut inner = self.inner.lock();
            if inner.activating == Some(epoch) {
                inner.activating = None;
            }
            inner.epoch != epoch
        };
        if !superseded {
            self.transition(SuiteRunState::Failed);
        }
    }

    /// Release the live run's topologies in reverse order.
    ///
    /// An activation still in flight is abandoned: it returns whatever it
    /// acquires once it completes. No-op if nothing is live or activating.
    pub(crate) async fn release(&self, resolver: &TopologyResolver) {
        let live = {
            let mut inner = self.inner.lock();
            if inner.activating.take().is_some() {
                log::warn!(
                    "Suite '{}' released before activation completed; abandoning it",
                    self.name
                );
            }
            inner.live.take()
        };
        let Some(live) = live else {
            return;
        };

        self.transition(SuiteRunState::Releasing);
        release_all(resolver, &live.acquired).await;
        self.transition(SuiteRunState::Done);
    }

    /// Context of the live run
    pub(crate) fn context(&self) -> Result<Arc<SuiteContext<S>>> {
        self.inner
            .lock()
            .live
            .as_ref()
            .map(|live| live.context.clone())
            .ok_or_else(|| FrameworkError::ContextUnavailable(self.name.clone()))
    }
}

async fn release_all(resolver: &TopologyResolver, acquired: &[TopoTypeId]) {
    for id in acquired.iter().rev() {
        resolver.release(id).await;
    }
}
