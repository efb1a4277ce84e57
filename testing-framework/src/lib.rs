//! # Switchtest Framework
//!
//! Declarative test registration for switch conformance suites with
//! reference-counted sharing of expensive network topologies.
//!
//! ## Architecture Overview
//!
//! - **Registry**: accumulates hooks, cases and topology bindings per suite
//!   type until the suite is generated
//! - **Compiler**: turns a generated suite into host-runner registrations,
//!   wrapping user hooks with topology activation and release
//! - **Topology resolver**: activates a topology on first acquire, shares it
//!   while referenced and deactivates it on last release
//! - **Host runner**: executes hooks and cases (`LocalRunner` in process)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchtest_framework::prelude::*;
//!
//! #[derive(Default)]
//! struct MacTable {
//!     learned: usize,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let harness = TestHarness::default();
//!     harness.catalog().register("dual-switch", DualSwitch::default);
//!
//!     let registry = harness.registry();
//!     registry.inject_topo::<MacTable>("topo", "dual-switch")?;
//!     registry.add_test::<MacTable, _, _>("learns source mac", |ctx| async move {
//!         let topo = ctx.topology::<DualSwitch>("topo")?;
//!         topo.send_frame().await?;
//!         ctx.state().await.learned += 1;
//!         Ok(())
//!     })?;
//!     registry.generate::<MacTable>("MAC table learning")?;
//!
//!     let report = harness.run().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Suite compilation and per-run state
pub mod compiler;

/// Runner configuration (YAML + environment)
pub mod config;

/// Per-run suite context handed to hooks and cases
pub mod context;

/// Framework error types
pub mod error;

/// Fully wired in-process environment
pub mod harness;

/// Host runner interface and the in-process runner
pub mod host;

/// Suite registration
pub mod registry;

/// Topology trait, catalog and shared resolver
pub mod topology;

/// Mock topologies and event recording for tests
pub mod test_utils;

// Convenient re-exports for common usage
pub mod prelude;

pub use compiler::{CompiledSuite, SuiteCompiler, SuiteRunState};
pub use config::{ReportFormat, RunnerConfig};
pub use context::SuiteContext;
pub use error::{FrameworkError, Result};
pub use harness::TestHarness;
pub use host::{HostRunner, LocalRunner, TestReport};
pub use registry::{SuiteBuilder, SuiteRegistry};
pub use topology::{TopoTypeId, Topology, TopologyCatalog, TopologyResolver};

/// Framework version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
