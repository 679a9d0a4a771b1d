//! Hex capture parser
//!
//! Parses captures written one frame per line: the arbitration ID (3 hex digits
//! for 11-bit, 8 for 29-bit) immediately followed by the data bytes.
//!
//! ```text
//! 18DAF1101039622660801FFF
//! 18DAF11021F3FFF000000000
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::types::{CanFrame, CanIdFormat, DecoderError, Result};

/// Largest CAN-FD data field
const MAX_DATA_BYTES: usize = 64;

/// Hex capture parser
pub struct HexCaptureParser;

impl HexCaptureParser {
    /// Parse capture text and return an iterator over CAN frames
    pub fn parse(text: &str, format: CanIdFormat) -> HexFrameIterator<'_> {
        HexFrameIterator {
            lines: text.lines().enumerate(),
            format,
        }
    }

    /// Parse capture text into a vector, stopping at the first malformed line
    pub fn parse_all(text: &str, format: CanIdFormat) -> Result<Vec<CanFrame>> {
        let frames = Self::parse(text, format).collect::<Result<Vec<_>>>()?;
        log::trace!("Parsed {} frames from capture", frames.len());
        Ok(frames)
    }

    /// Parse a single capture line
    ///
    /// `line_no` is only used for error reporting (1-based).
    pub fn parse_line(line: &str, line_no: usize, format: CanIdFormat) -> Result<CanFrame> {
        let line = line.trim();
        let fail = |reason: String| DecoderError::FrameParse {
            line: line_no,
            reason,
        };

        if let Some(bad) = line.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(fail(format!("non-hex character {:?}", bad)));
        }

        let is_extended = match format {
            CanIdFormat::Standard => false,
            CanIdFormat::Extended => true,
            CanIdFormat::Auto => line.len() % 2 == 0,
        };
        let id_digits = if is_extended { 8 } else { 3 };

        if line.len() <= id_digits {
            return Err(fail(format!(
                "{} characters is too short for a {}-digit ID plus data",
                line.len(),
                id_digits
            )));
        }

        let (id_text, data_text) = line.split_at(id_digits);
        if data_text.len() % 2 != 0 {
            return Err(fail(format!(
                "data field has odd length {} for a {}-digit ID",
                data_text.len(),
                id_digits
            )));
        }
        if data_text.len() / 2 > MAX_DATA_BYTES {
            return Err(fail(format!(
                "{} data bytes exceed the CAN-FD limit of {}",
                data_text.len() / 2,
                MAX_DATA_BYTES
            )));
        }

        // content already validated as hex
        let can_id = u32::from_str_radix(id_text, 16).map_err(|e| fail(e.to_string()))?;
        let data = hex::decode(data_text).map_err(|e| fail(e.to_string()))?;

        CanFrame::new(can_id, data, is_extended).map_err(|e| match e {
            DecoderError::FrameParse { reason, .. } => fail(reason),
            other => other,
        })
    }
}

/// Iterator over CAN frames from capture text
pub struct HexFrameIterator<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    format: CanIdFormat,
}

impl<'a> Iterator for HexFrameIterator<'a> {
    type Item = Result<CanFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        for (idx, line) in self.lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(HexCaptureParser::parse_line(trimmed, idx + 1, self.format));
        }
        None
    }
}
