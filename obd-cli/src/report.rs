//! Report generation
//!
//! Plain-text summary of a calibration run. The first failing case is
//! printed in full so it can be reproduced from the report alone.

use crate::runner::{CaseFailure, CaseResult};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};

/// Results of one suite run
pub struct SuiteReport {
    pub suite: PathBuf,
    pub generated_at: DateTime<Local>,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn new(suite: &Path, results: Vec<CaseResult>) -> Self {
        Self {
            suite: suite.to_path_buf(),
            generated_at: Local::now(),
            results,
        }
    }

    pub fn passed_cases(&self) -> usize {
        self.results.iter().filter(|r| r.is_pass()).count()
    }

    pub fn failed_cases(&self) -> usize {
        self.results.len() - self.passed_cases()
    }

    pub fn is_success(&self) -> bool {
        self.failed_cases() == 0
    }

    pub fn first_failure(&self) -> Option<&CaseResult> {
        self.results.iter().find(|r| !r.is_pass())
    }

    /// Render the report as text
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "Calibration report: {}", self.suite.display())?;
        writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out)?;

        for result in &self.results {
            let status = if result.is_pass() { "PASS" } else { "FAIL" };
            writeln!(out, "  [{}] {}", status, result.label())?;
            for failure in &result.failures {
                writeln!(out, "         {}", failure)?;
            }
        }

        writeln!(out)?;
        writeln!(
            out,
            "{} cases: {} passed, {} failed",
            self.results.len(),
            self.passed_cases(),
            self.failed_cases()
        )?;

        if let Some(first) = self.first_failure() {
            writeln!(out)?;
            writeln!(out, "First failure: {}", first.label())?;
            writeln!(out, "Capture:")?;
            for line in first.response.lines().map(str::trim).filter(|l| !l.is_empty()) {
                writeln!(out, "    {}", line)?;
            }
            for failure in &first.failures {
                writeln!(out, "  {}: {}", failure.kind(), failure)?;
                if let CaseFailure::Mismatch {
                    expected, actual, ..
                } = failure
                {
                    writeln!(out, "    expected: {}", expected)?;
                    writeln!(out, "    actual:   {}", actual)?;
                }
            }
        }
        Ok(())
    }
}
