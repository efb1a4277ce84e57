//! Convenient re-exports for writing suites
//!
//! ```rust,ignore
//! use switchtest_framework::prelude::*;
//! ```

pub use std::sync::Arc;
pub use std::time::Duration;

pub use anyhow::{anyhow, bail, ensure, Context as _};
pub use async_trait::async_trait;

pub use crate::compiler::{CompiledSuite, SuiteCompiler, SuiteRunState};
pub use crate::config::{ReportFormat, RunnerConfig};
pub use crate::context::SuiteContext;
pub use crate::error::FrameworkError;
pub use crate::harness::TestHarness;
pub use crate::host::{HostRunner, LocalRunner, TestReport, TestStatus};
pub use crate::registry::{SuiteBuilder, SuiteRegistry, DEFAULT_CASE_TIMEOUT};
pub use crate::topology::{
    TopoTypeId, Topology, TopologyCatalog, TopologyHandle, TopologyResolver, TopologyStore,
};
