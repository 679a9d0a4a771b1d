//! Capture format parsers
//!
//! This module contains parsers that turn textual CAN captures into frames.
//! Each parser implements an iterator pattern over CanFrame objects.

pub mod hex;

// Re-export parser types
pub use hex::{HexCaptureParser, HexFrameIterator};
