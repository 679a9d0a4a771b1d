//! Decoder configuration types
//!
//! This module defines the minimal configuration needed by the decoder library.
//! Everything else (which captures to run, what to compare against) belongs to
//! the caller.

use crate::types::CanIdFormat;
use serde::{Deserialize, Serialize};

/// ISO-TP first frames carry a 12-bit length unless they use the escape form
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 4095;

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Arbitration ID width of capture lines
    #[serde(default)]
    pub id_format: CanIdFormat,

    /// Reject responses whose arbitration ID does not match the signal's responder
    #[serde(default = "default_true")]
    pub check_response_id: bool,

    /// Largest payload a first frame may declare
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_payload_len() -> usize {
    DEFAULT_MAX_PAYLOAD_LEN
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            id_format: CanIdFormat::default(),
            check_response_id: true,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the arbitration ID width of capture lines
    pub fn with_id_format(mut self, format: CanIdFormat) -> Self {
        self.id_format = format;
        self
    }

    /// Builder method: enable or disable the responder ID check
    pub fn with_response_id_check(mut self, enabled: bool) -> Self {
        self.check_response_id = enabled;
        self
    }

    /// Builder method: set the largest accepted payload
    pub fn with_max_payload_len(mut self, limit: usize) -> Self {
        self.max_payload_len = limit;
        self
    }
}
