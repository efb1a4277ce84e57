// File: testing-framework/src/harness.rs
//
// Test Harness
//
// Wires one catalog, resolver, runner, compiler and registry together so a
// test binary only has to register topologies and suites, then call `run()`.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::compiler::SuiteCompiler;
use crate::config::RunnerConfig;
use crate::host::{HostRunner, LocalRunner, TestReport};
use crate::registry::SuiteRegistry;
use crate::topology::{TopologyCatalog, TopologyResolver};

/// Fully wired in-process test environment
///
/// # Example
///
/// ```rust,ignore
/// let harness = TestHarness::new(RunnerConfig::default().apply_env()?);
/// harness.catalog().register("dual-switch", DualSwitch::default);
///
/// let registry = harness.registry();
/// registry.inject_topo::<MacTable>("topo", "dual-switch")?;
/// registry.add_test::<MacTable, _, _>("learns source mac", learns_source_mac)?;
/// registry.generate::<MacTable>("MAC table learning")?;
///
/// let report = harness.run().await?;
/// assert!(report.all_passed());
/// ```
pub struct TestHarness {
    catalog: Arc<TopologyCatalog>,
    resolver: Arc<TopologyResolver>,
    runner: Arc<LocalRunner>,
    registry: SuiteRegistry,
}

impl TestHarness {
    /// Build a harness around a fresh catalog
    pub fn new(config: RunnerConfig) -> Self {
        let catalog = Arc::new(TopologyCatalog::new());
        let resolver = Arc::new(TopologyResolver::new(catalog.clone()));
        let runner = Arc::new(LocalRunner::new(config));
        let compiler = Arc::new(SuiteCompiler::new(
            resolver.clone(),
            runner.clone() as Arc<dyn HostRunner>,
        ));

        Self {
            catalog,
            resolver,
            runner,
            registry: SuiteRegistry::new(compiler),
        }
    }

    /// Topology catalog backing the resolver
    pub fn catalog(&self) -> &TopologyCatalog {
        &self.catalog
    }

    /// Suite registry
    pub fn registry(&self) -> &SuiteRegistry {
        &self.registry
    }

    /// Shared topology resolver
    pub fn resolver(&self) -> &TopologyResolver {
        &self.resolver
    }

    /// In-process runner
    pub fn runner(&self) -> &LocalRunner {
        &self.runner
    }

    /// Run every generated suite.
    ///
    /// Orphaned suites are listed in the report. The report is written to
    /// `report_path` when one is configured.
    pub async fn run(&self) -> Result<TestReport> {
        let mut report = self.runner.run().await;
        report.orphaned_suites = self.registry.orphaned_suites();
        for orphan in &report.orphaned_suites {
            log::warn!("Suite '{}' was registered but never generated", orphan);
        }

        let live = self.resolver.live_topologies();
        if !live.is_empty() {
            log::warn!("Topologies still live after the run: {:?}", live);
        }

        let config = self.runner.config();
        if let Some(path) = &config.report_path {
            report
                .save(path, config.report_format)
                .await
                .with_context(|| format!("Failed to save report to {}", path.display()))?;
        }

        Ok(report)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportFormat;
    use crate::test_utils::MockTopology;

    #[derive(Default)]
    struct Registered;

    #[derive(Default)]
    struct Forgotten;

    #[tokio::test]
    async fn test_run_reports_orphans() {
        let harness = TestHarness::default();
        let topo = Arc::new(MockTopology::new("switch"));
        harness.catalog().register_shared("switch", topo.clone());

        let registry = harness.registry();
        registry.inject_topo::<Registered>("topo", "switch").unwrap();
        registry
            .add_test::<Registered, _, _>("passes", |_ctx| async { Ok(()) })
            .unwrap();
        registry.generate::<Registered>("registered").unwrap();
        registry
            .add_test::<Forgotten, _, _>("never runs", |_ctx| async { Ok(()) })
            .unwrap();

        let report = harness.run().await.unwrap();

        assert_eq!(report.passed, 1);
        assert_eq!(report.orphaned_suites.len(), 1);
        assert!(report.orphaned_suites[0].contains("Forgotten"));
        assert_eq!(topo.activations(), 1);
        assert_eq!(topo.deactivations(), 1);
        assert!(harness.resolver().live_topologies().is_empty());
    }

    #[tokio::test]
    async fn test_run_saves_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        let harness = TestHarness::new(RunnerConfig {
            report_path: Some(path.clone()),
            report_format: ReportFormat::Junit,
            ..RunnerConfig::default()
        });

        harness
            .registry()
            .add_test::<Registered, _, _>("passes", |_ctx| async { Ok(()) })
            .unwrap();
        harness.registry().generate::<Registered>("saved").unwrap();
        harness.run().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("<testsuite name=\"saved\""));
    }
}
