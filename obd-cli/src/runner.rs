//! Calibration runner
//!
//! Decodes every case of a suite and compares the results with the expected
//! values. Cases are independent, so they run in parallel over one shared
//! catalog.

use crate::config::{CalibrationSuite, ExpectedValue};
use obd_decoder::{Decoder, DecoderConfig, DecoderError, SignalCatalog, SignalValue};
use rayon::prelude::*;

/// Why a case did not pass
#[derive(Debug, thiserror::Error)]
pub enum CaseFailure {
    #[error("capture could not be reassembled: {0}")]
    Capture(#[source] DecoderError),

    #[error("{signal}: {source}")]
    Decode {
        signal: String,
        #[source]
        source: DecoderError,
    },

    #[error("{signal}: expected {expected}, got {actual}")]
    Mismatch {
        signal: String,
        expected: ExpectedValue,
        actual: SignalValue,
    },
}

impl CaseFailure {
    /// Short classification for reports
    pub fn kind(&self) -> &'static str {
        match self {
            CaseFailure::Capture(DecoderError::FrameParse { .. }) => "frame parse error",
            CaseFailure::Capture(_) => "transport error",
            CaseFailure::Decode {
                source: DecoderError::NoApplicableRule { .. } | DecoderError::AmbiguousRule { .. },
                ..
            } => "rule resolution error",
            CaseFailure::Decode { .. } => "decode error",
            CaseFailure::Mismatch { .. } => "value mismatch",
        }
    }
}

/// Outcome of one case
#[derive(Debug)]
pub struct CaseResult {
    pub model_year: u16,
    /// 1-based position within its group
    pub index: usize,
    pub name: Option<String>,
    pub response: String,
    /// Number of signals that matched
    pub passed: usize,
    pub failures: Vec<CaseFailure>,
}

impl CaseResult {
    pub fn is_pass(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("MY{} #{} ({})", self.model_year, self.index, name),
            None => format!("MY{} #{}", self.model_year, self.index),
        }
    }
}

/// Run every case of `suite` against `catalog`, in suite order
pub fn run_suite(suite: &CalibrationSuite, catalog: &SignalCatalog) -> Vec<CaseResult> {
    let config = DecoderConfig::new()
        .with_id_format(suite.id_format)
        .with_response_id_check(suite.check_response_id);
    let decoder = Decoder::new(catalog, config);

    let cases: Vec<_> = suite
        .groups
        .iter()
        .flat_map(|group| {
            group
                .cases
                .iter()
                .enumerate()
                .map(move |(idx, case)| (group.model_year, idx + 1, case))
        })
        .collect();

    log::info!("Running {} calibration cases", cases.len());

    cases
        .par_iter()
        .map(|(model_year, index, case)| {
            let mut result = CaseResult {
                model_year: *model_year,
                index: *index,
                name: case.name.clone(),
                response: case.response.clone(),
                passed: 0,
                failures: Vec::new(),
            };

            let response = match decoder
                .parse_capture(&case.response)
                .and_then(|frames| decoder.reassemble(&frames))
            {
                Ok(response) => response,
                Err(e) => {
                    result.failures.push(CaseFailure::Capture(e));
                    return result;
                }
            };

            for (signal, expected) in &case.expected {
                match decoder.decode_payload(*model_year, &response, signal) {
                    Ok(decoded) if expected.matches(&decoded.value) => result.passed += 1,
                    Ok(decoded) => result.failures.push(CaseFailure::Mismatch {
                        signal: signal.clone(),
                        expected: *expected,
                        actual: decoded.value,
                    }),
                    Err(source) => result.failures.push(CaseFailure::Decode {
                        signal: signal.clone(),
                        source,
                    }),
                }
            }

            log::debug!(
                "{}: {} passed, {} failed",
                result.label(),
                result.passed,
                result.failures.len()
            );
            result
        })
        .collect()
}
