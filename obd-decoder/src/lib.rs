//! OBD Signal Decoder Library
//!
//! A stateless, reusable library for decoding OBD-II / UDS diagnostic
//! responses captured from a CAN bus into named physical signals.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Parses hex capture lines into CAN frames
//! - Reassembles ISO-TP multi-frame transport sessions
//! - Loads signal-set JSON into a read-only catalog
//! - Resolves model-year specific rules and decodes bit fields and formulas
//! - Formats signal-set files canonically
//!
//! The library does NOT:
//! - Talk to a live bus or build requests
//! - Detect vehicles or persist captures
//! - Run calibration suites or print reports
//!
//! All higher-level functionality is in the application layer (obd-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use obd_decoder::{load_signalset_file, Decoder, DecoderConfig};
//! use std::path::Path;
//!
//! // Load the vehicle's signal set once
//! let catalog = load_signalset_file(Path::new("signalsets/v3/Honda-Civic.json")).unwrap();
//!
//! // Decoders only borrow the catalog
//! let decoder = Decoder::new(&catalog, DecoderConfig::new());
//!
//! let capture = std::fs::read_to_string("odometer.txt").unwrap();
//! let frames = decoder.parse_capture(&capture).unwrap();
//! for signal in decoder.decode_response(2018, &frames).unwrap() {
//!     println!("{} = {} {}", signal.name, signal.value, signal.unit.unwrap_or_default());
//! }
//! ```

// Public modules
pub mod cantp;
pub mod config;
pub mod decoder;
pub mod formats;
pub mod signal_decoder;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use cantp::{reassemble, SessionState, TransportSession};
pub use config::DecoderConfig;
pub use decoder::{Decoder, Response};
pub use formats::HexCaptureParser;
pub use signals::formatter::{format_file, format_signalset};
pub use signals::{load_signalset_file, parse_signalset, resolve, SignalCatalog};
pub use types::{
    CanFrame, CanIdFormat, DecodeError, DecodedSignal, DecoderError, ProtocolError, Result,
    SignalValue,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
