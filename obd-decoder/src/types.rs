//! Core types for the OBD signal decoder library
//!
//! This module defines the frames the decoder consumes, the values it emits and
//! the error taxonomy shared by every layer. The decoder is stateless: nothing
//! in here is retained between decode calls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Highest 11-bit arbitration ID
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest 29-bit arbitration ID
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Raw CAN frame parsed from a capture line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN arbitration ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (8 for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl CanFrame {
    /// Create a frame, checking the ID against its address space
    pub fn new(can_id: u32, data: Vec<u8>, is_extended: bool) -> Result<Self> {
        let limit = if is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if can_id > limit {
            return Err(DecoderError::FrameParse {
                line: 0,
                reason: format!("arbitration ID 0x{:X} exceeds 0x{:X}", can_id, limit),
            });
        }
        Ok(Self {
            can_id,
            data,
            is_extended,
        })
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}", self.can_id)?;
        } else {
            write!(f, "{:03X}", self.can_id)?;
        }
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Arbitration ID width used when parsing capture lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanIdFormat {
    /// 3 hex digits, 11-bit IDs
    Standard,
    /// 8 hex digits, 29-bit IDs
    Extended,
    /// Infer from line length: odd length means 11-bit, even means 29-bit
    #[default]
    Auto,
}

/// Errors raised while reassembling an ISO-TP transport session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("capture contains no frames")]
    EmptyCapture,

    #[error("frame from 0x{found:X} in a session for 0x{expected:X}")]
    MixedArbitrationIds { expected: u32, found: u32 },

    #[error("session ended after {received} of {declared} bytes")]
    IncompleteSession { declared: usize, received: usize },

    #[error("consecutive frame index {found} where {expected} was expected")]
    SequenceViolation { expected: u8, found: u8 },

    #[error("unexpected {kind} frame in state {state}")]
    UnexpectedFrame {
        kind: &'static str,
        state: &'static str,
    },

    #[error("single frame declares {declared} bytes but carries {available}")]
    InvalidSingleFrame { declared: usize, available: usize },

    #[error("declared payload of {declared} bytes exceeds limit of {limit}")]
    PayloadTooLarge { declared: usize, limit: usize },
}

/// Errors raised while extracting and transforming a signal value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("bit field {bit_offset}+{bit_length} exceeds payload of {payload_bits} bits")]
    OutOfRange {
        bit_offset: u32,
        bit_length: u32,
        payload_bits: usize,
    },

    #[error("formula references unknown field '{0}'")]
    UnknownField(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Failed to parse frame on line {line}: {reason}")]
    FrameParse { line: usize, reason: String },

    #[error("Transport error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("No rule for signal {signal} applies to model year {model_year}")]
    NoApplicableRule { signal: String, model_year: u16 },

    #[error("{candidates} rules for signal {signal} match model year {model_year}")]
    AmbiguousRule {
        signal: String,
        model_year: u16,
        candidates: usize,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Negative response to service 0x{service:02X}: NRC 0x{code:02X}")]
    NegativeResponse { service: u8, code: u8 },

    #[error("Response does not answer command: expected prefix {expected:02X?}, got {found:02X?}")]
    UnexpectedResponse { expected: Vec<u8>, found: Vec<u8> },

    #[error("Response from 0x{found:X} does not match signal {signal}")]
    ResponderMismatch { signal: String, found: u32 },

    #[error("Failed to parse signal set: {0}")]
    CatalogParse(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    /// Signal identifier from the signal set
    pub name: String,
    /// Decoded physical value
    pub value: SignalValue,
    /// Engineering unit (e.g., "kilometers", "celsius")
    pub unit: Option<String>,
    /// Description from the rule's value map, if the raw value has one
    pub value_description: Option<String>,
    /// Raw value of the primary field before scaling (useful for debugging)
    ///
    /// `None` when an unsigned 64-bit field does not fit `i64`.
    pub raw_value: Option<i64>,
}

/// Signal value types supported by the decoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    /// Exact integer result
    Integer(i64),
    /// Floating-point result (after scaling or a formula)
    Float(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:?}", v),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
        }
    }

    /// Convert signal value to i64 if it has no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            SignalValue::Float(_) => None,
        }
    }

    /// Numeric equality across representations (`36` equals `36.0`)
    pub fn matches(&self, expected: f64) -> bool {
        self.as_f64() == expected
    }
}
