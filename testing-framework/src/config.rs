// File: testing-framework/src/config.rs
//
// Runner Configuration
//
// Loaded from YAML, then optionally overridden from the environment:
//
//   SWITCHTEST_FILTER              only run cases whose "<suite> <case>" contains this
//   SWITCHTEST_SUITE_CONCURRENCY   number of suites run at once
//   SWITCHTEST_HOOK_TIMEOUT_MS     timeout applied to every hook
//   SWITCHTEST_REPORT              report file path; format from extension (.json/.xml/.txt)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::FrameworkError;

/// Environment variable overriding [`RunnerConfig::filter`]
pub const ENV_FILTER: &str = "SWITCHTEST_FILTER";
/// Environment variable overriding [`RunnerConfig::suite_concurrency`]
pub const ENV_SUITE_CONCURRENCY: &str = "SWITCHTEST_SUITE_CONCURRENCY";
/// Environment variable overriding [`RunnerConfig::hook_timeout_ms`]
pub const ENV_HOOK_TIMEOUT_MS: &str = "SWITCHTEST_HOOK_TIMEOUT_MS";
/// Environment variable overriding [`RunnerConfig::report_path`]
pub const ENV_REPORT: &str = "SWITCHTEST_REPORT";

/// Output format of a saved report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// JUnit XML
    Junit,
    /// Human-readable summary
    Text,
}

impl ReportFormat {
    /// Guess a format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ReportFormat::Json),
            "xml" => Some(ReportFormat::Junit),
            "txt" | "log" => Some(ReportFormat::Text),
            _ => None,
        }
    }
}

/// Configuration of the in-process runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Number of suites run concurrently
    pub suite_concurrency: usize,
    /// Timeout applied to every hook, in milliseconds
    pub hook_timeout_ms: u64,
    /// Only run cases whose "<suite> <case>" name contains this substring
    pub filter: Option<String>,
    /// Where to write the report after a run
    pub report_path: Option<PathBuf>,
    /// Format of the written report
    pub report_format: ReportFormat,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            suite_concurrency: 1,
            hook_timeout_ms: 60_000,
            filter: None,
            report_path: None,
            report_format: ReportFormat::Json,
        }
    }
}

impl RunnerConfig {
    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runner config: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse runner config: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a YAML config
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RunnerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SWITCHTEST_*` overrides from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (used by `apply_env`)
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(filter) = lookup(ENV_FILTER) {
            self.filter = if filter.is_empty() { None } else { Some(filter) };
        }
        if let Some(value) = lookup(ENV_SUITE_CONCURRENCY) {
            self.suite_concurrency = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got '{}'", ENV_SUITE_CONCURRENCY, value))?;
        }
        if let Some(value) = lookup(ENV_HOOK_TIMEOUT_MS) {
            self.hook_timeout_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be milliseconds, got '{}'", ENV_HOOK_TIMEOUT_MS, value))?;
        }
        if let Some(path) = lookup(ENV_REPORT) {
            let path = PathBuf::from(path);
            if let Some(format) = ReportFormat::from_path(&path) {
                self.report_format = format;
            }
            self.report_path = Some(path);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the runner cannot honor
    pub fn validate(&self) -> std::result::Result<(), FrameworkError> {
        if self.suite_concurrency == 0 {
            return Err(FrameworkError::Config(
                "suite_concurrency must be at least 1".to_string(),
            ));
        }
        if self.hook_timeout_ms == 0 {
            return Err(FrameworkError::Config(
                "hook_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Hook timeout as a duration
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Whether the case passes the name filter
    pub fn matches(&self, suite: &str, case: &str) -> bool {
        match &self.filter {
            Some(filter) => format!("{} {}", suite, case).contains(filter.as_str()),
            None => true,
        }
    }
}
