//! Run reports
//!
//! Collected by the in-process runner. Supports pretty JSON, JUnit XML and a
//! human-readable summary.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::ReportFormat;
use crate::error::{FrameworkError, Result};

/// Outcome of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Case passed
    Pass,
    /// Case body, a hook around it, or suite setup failed
    Fail,
    /// Case was not run (filtered or not exclusive)
    Skip,
    /// Case exceeded its timeout and was abandoned
    Timeout,
}

/// Result of one case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    /// Case name
    pub name: String,
    /// Outcome
    pub status: TestStatus,
    /// Time spent in beforeEach, body and afterEach
    pub duration_ms: u64,
    /// Failure or skip reason
    pub error: Option<String>,
}

impl CaseReport {
    /// A passed case
    pub fn passed(name: &str, duration: Duration) -> Self {
        Self::with_status(name, TestStatus::Pass, duration, None)
    }

    /// A failed case
    pub fn failed(name: &str, duration: Duration, error: String) -> Self {
        Self::with_status(name, TestStatus::Fail, duration, Some(error))
    }

    /// A timed-out case
    pub fn timed_out(name: &str, duration: Duration, error: String) -> Self {
        Self::with_status(name, TestStatus::Timeout, duration, Some(error))
    }

    /// A case that did not run
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self::with_status(name, TestStatus::Skip, Duration::ZERO, Some(reason.to_string()))
    }

    fn with_status(name: &str, status: TestStatus, duration: Duration, error: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            error,
        }
    }
}

/// Results of one suite
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Suite name
    pub name: String,
    /// Case results in registration order
    pub cases: Vec<CaseReport>,
    /// beforeAll / afterAll failures
    pub hook_failures: Vec<String>,
}

impl SuiteReport {
    /// Create an empty report for `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Result of case `name`, if it was recorded
    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|case| case.name == name)
    }

    /// No failed or timed-out case and no hook failure
    pub fn all_passed(&self) -> bool {
        self.hook_failures.is_empty()
            && self
                .cases
                .iter()
                .all(|case| matches!(case.status, TestStatus::Pass | TestStatus::Skip))
    }
}

/// Results of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Total cases
    pub total: usize,
    /// Cases passed
    pub passed: usize,
    /// Cases failed
    pub failed: usize,
    /// Cases skipped
    pub skipped: usize,
    /// Cases timed out
    pub timed_out: usize,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
    /// Per-suite results in registration order
    pub suites: Vec<SuiteReport>,
    /// Suites whose members were registered but which were never generated
    pub orphaned_suites: Vec<String>,
}

impl TestReport {
    /// Create an empty report
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            timed_out: 0,
            duration_ms: 0,
            suites: Vec::new(),
            orphaned_suites: Vec::new(),
        }
    }

    /// Add one suite's results to the totals
    pub fn add_suite(&mut self, suite: SuiteReport) {
        for case in &suite.cases {
            self.total += 1;
            match case.status {
                TestStatus::Pass => self.passed += 1,
                TestStatus::Fail => self.failed += 1,
                TestStatus::Skip => self.skipped += 1,
                TestStatus::Timeout => self.timed_out += 1,
            }
        }
        self.suites.push(suite);
    }

    /// Record the run's wall-clock duration
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
    }

    /// Results of suite `name`
    pub fn suite(&self, name: &str) -> Option<&SuiteReport> {
        self.suites.iter().find(|suite| suite.name == name)
    }

    /// No failures, timeouts, hook failures or orphaned suites
    pub fn all_passed(&self) -> bool {
        self.failed == 0
            && self.timed_out == 0
            && self.orphaned_suites.is_empty()
            && self.suites.iter().all(|suite| suite.hook_failures.is_empty())
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// JUnit XML, one `<testsuite>` per suite
    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\">\n",
            self.total,
            self.failed + self.timed_out,
            self.skipped,
            self.duration_ms as f64 / 1000.0
        ));

        for suite in &self.suites {
            let failures = suite
                .cases
                .iter()
                .filter(|case| matches!(case.status, TestStatus::Fail | TestStatus::Timeout))
                .count();
            let skipped = suite
                .cases
                .iter()
                .filter(|case| case.status == TestStatus::Skip)
                .count();
            xml.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\">\n",
                escape_xml(&suite.name),
                suite.cases.len(),
                failures,
                suite.hook_failures.len(),
                skipped
            ));

            for case in &suite.cases {
                xml.push_str(&format!(
                    "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                    escape_xml(&suite.name),
                    escape_xml(&case.name),
                    case.duration_ms as f64 / 1000.0
                ));
                let error = case.error.as_deref().unwrap_or_default();
                match case.status {
                    TestStatus::Pass => xml.push_str(" />\n"),
                    TestStatus::Fail => xml.push_str(&format!(
                        ">\n      <failure message=\"Test failed\">{}</failure>\n    </testcase>\n",
                        escape_xml(error)
                    )),
                    TestStatus::Timeout => xml.push_str(&format!(
                        ">\n      <failure message=\"Timed out\">{}</failure>\n    </testcase>\n",
                        escape_xml(error)
                    )),
                    TestStatus::Skip => {
                        xml.push_str(">\n      <skipped />\n    </testcase>\n");
                    }
                }
            }

            for failure in &suite.hook_failures {
                xml.push_str(&format!(
                    "    <system-err>{}</system-err>\n",
                    escape_xml(failure)
                ));
            }
            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("\n=== Switch Conformance Test Report ===\n\n");
        out.push_str(&format!(
            "Total: {} | Passed: {} | Failed: {} | Timed out: {} | Skipped: {}\n",
            self.total, self.passed, self.failed, self.timed_out, self.skipped
        ));
        out.push_str(&format!(
            "Duration: {:.2}s\n",
            self.duration_ms as f64 / 1000.0
        ));

        for suite in &self.suites {
            if suite.all_passed() {
                continue;
            }
            out.push_str(&format!("\n{}\n", suite.name));
            for failure in &suite.hook_failures {
                out.push_str(&format!("  ! {}\n", failure));
            }
            for case in &suite.cases {
                if matches!(case.status, TestStatus::Fail | TestStatus::Timeout) {
                    out.push_str(&format!("  - {} [{:?}]\n", case.name, case.status));
                    if let Some(error) = &case.error {
                        out.push_str(&format!("    Error: {}\n", error));
                    }
                }
            }
        }

        if !self.orphaned_suites.is_empty() {
            out.push_str("\nRegistered but never generated (cases did not run):\n");
            for orphan in &self.orphaned_suites {
                out.push_str(&format!("  - {}\n", orphan));
            }
        }

        out.push_str(&format!(
            "\nResult: {}\n",
            if self.all_passed() { "PASS" } else { "FAIL" }
        ));
        out
    }

    /// Render in `format`
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Json => self.to_json(),
            ReportFormat::Junit => self.to_junit_xml(),
            ReportFormat::Text => self.summary(),
        }
    }

    /// Write the report to `path`, creating parent directories
    pub async fn save(&self, path: &Path, format: ReportFormat) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FrameworkError::Report(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let mut file = fs::File::create(path)
            .await
            .map_err(|e| FrameworkError::Report(format!("{}: {}", path.display(), e)))?;
        file.write_all(self.render(format).as_bytes())
            .await
            .map_err(|e| FrameworkError::Report(format!("{}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| FrameworkError::Report(format!("{}: {}", path.display(), e)))?;

        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
