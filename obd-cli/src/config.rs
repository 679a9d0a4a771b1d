//! Calibration suite loading and parsing

use anyhow::{bail, Context, Result};
use obd_decoder::{CanIdFormat, SignalValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Calibration suite (loaded from a .toml file)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationSuite {
    /// Signal set to decode with, relative to the suite file
    pub signalset: PathBuf,
    #[serde(default)]
    pub id_format: CanIdFormat,
    #[serde(default = "default_true")]
    pub check_response_id: bool,
    pub groups: Vec<YearGroup>,
}

fn default_true() -> bool {
    true
}

/// Captures recorded from one model year
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct YearGroup {
    pub model_year: u16,
    pub cases: Vec<CaseConfig>,
}

/// One captured response and the values it must decode to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CaseConfig {
    pub name: Option<String>,
    /// Hex capture lines
    pub response: String,
    /// Signal id -> expected value
    pub expected: BTreeMap<String, ExpectedValue>,
}

/// Expected decoded value, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Integer(i64),
    Float(f64),
}

impl ExpectedValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ExpectedValue::Integer(v) => *v as f64,
            ExpectedValue::Float(v) => *v,
        }
    }

    /// `36` matches both `Integer(36)` and `Float(36.0)`
    pub fn matches(&self, actual: &SignalValue) -> bool {
        match (self, actual) {
            (ExpectedValue::Integer(want), SignalValue::Integer(got)) => want == got,
            _ => actual.matches(self.as_f64()),
        }
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Integer(v) => write!(f, "{}", v),
            ExpectedValue::Float(v) => write!(f, "{:?}", v),
        }
    }
}

impl CalibrationSuite {
    /// Resolve the signal-set path against the directory of the suite file
    pub fn signalset_path(&self, suite_path: &Path) -> PathBuf {
        match suite_path.parent() {
            Some(dir) if self.signalset.is_relative() => dir.join(&self.signalset),
            _ => self.signalset.clone(),
        }
    }

    /// Total number of signal checks
    pub fn num_checks(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| &g.cases)
            .map(|c| c.expected.len())
            .sum()
    }

    fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            bail!("suite has no groups");
        }
        for group in &self.groups {
            for (idx, case) in group.cases.iter().enumerate() {
                if case.expected.is_empty() {
                    bail!(
                        "MY{} case #{} has no expected values",
                        group.model_year,
                        idx + 1
                    );
                }
            }
        }
        Ok(())
    }
}

/// Load a calibration suite from a TOML file
pub fn load_suite(path: &Path) -> Result<CalibrationSuite> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read suite file: {:?}", path))?;

    let suite: CalibrationSuite = toml::from_str(&content)
        .with_context(|| format!("Failed to parse suite file: {:?}", path))?;

    suite
        .validate()
        .with_context(|| format!("Invalid suite file: {:?}", path))?;

    Ok(suite)
}
