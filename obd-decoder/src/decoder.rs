//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! A `Decoder` borrows a loaded signal catalog and turns captured response
//! frames into named physical values for a given model year.

use crate::cantp;
use crate::config::DecoderConfig;
use crate::formats::HexCaptureParser;
use crate::signal_decoder::SignalDecoder;
use crate::signals::catalog::{CatalogStats, Command, SignalCatalog, SignalDefinition, SignalRule};
use crate::signals::resolver;
use crate::types::{CanFrame, DecodedSignal, DecoderError, Result};

/// Service byte of a negative response
const NEGATIVE_RESPONSE: u8 = 0x7F;

/// A reassembled diagnostic response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Arbitration ID of the responding module
    pub can_id: u32,
    /// Complete response payload, starting with the service echo
    pub payload: Vec<u8>,
}

/// The main decoder struct - entry point for all decoding operations
///
/// Holds no per-call state. One catalog can back any number of decoders on
/// any number of threads.
pub struct Decoder<'a> {
    catalog: &'a SignalCatalog,
    config: DecoderConfig,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a loaded catalog
    pub fn new(catalog: &'a SignalCatalog, config: DecoderConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &'a SignalCatalog {
        self.catalog
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Get statistics about the loaded catalog
    pub fn catalog_stats(&self) -> CatalogStats {
        self.catalog.stats()
    }

    /// Parse hex capture text into frames using the configured ID width
    pub fn parse_capture(&self, text: &str) -> Result<Vec<CanFrame>> {
        HexCaptureParser::parse_all(text, self.config.id_format)
    }

    /// Reassemble the frames of one exchange into a response
    pub fn reassemble(&self, frames: &[CanFrame]) -> Result<Response> {
        let payload = cantp::reassemble(frames, self.config.max_payload_len)?;
        // reassemble() rejects empty captures, so frames[0] exists
        let can_id = frames.first().map(|f| f.can_id).unwrap_or_default();
        Ok(Response { can_id, payload })
    }

    /// Decode one signal from the frames of one response
    ///
    /// # Example
    /// ```no_run
    /// use obd_decoder::{Decoder, DecoderConfig, load_signalset_file};
    /// use std::path::Path;
    ///
    /// let catalog = load_signalset_file(Path::new("signalsets/v3/Honda-Civic.json")).unwrap();
    /// let decoder = Decoder::new(&catalog, DecoderConfig::new());
    /// let capture = std::fs::read_to_string("aat.txt").unwrap();
    /// let frames = decoder.parse_capture(&capture).unwrap();
    /// let aat = decoder.decode_signal(2016, &frames, "CIVIC_AAT").unwrap();
    /// println!("{} = {}", aat.name, aat.value);
    /// ```
    pub fn decode_signal(
        &self,
        model_year: u16,
        frames: &[CanFrame],
        signal_name: &str,
    ) -> Result<DecodedSignal> {
        let definition = self.catalog.find(signal_name)?;
        let rule = resolver::resolve(definition, model_year)?;
        let response = self.reassemble(frames)?;
        self.decode_with_rule(definition, rule, &response)
    }

    /// Decode one signal from hex capture text
    pub fn decode_capture(
        &self,
        model_year: u16,
        capture: &str,
        signal_name: &str,
    ) -> Result<DecodedSignal> {
        let frames = self.parse_capture(capture)?;
        self.decode_signal(model_year, &frames, signal_name)
    }

    /// Decode one signal from an already reassembled response
    pub fn decode_payload(
        &self,
        model_year: u16,
        response: &Response,
        signal_name: &str,
    ) -> Result<DecodedSignal> {
        let definition = self.catalog.find(signal_name)?;
        let rule = resolver::resolve(definition, model_year)?;
        self.decode_with_rule(definition, rule, response)
    }

    /// Decode every signal the response answers
    ///
    /// Signals without a rule for `model_year` are skipped. Signals whose
    /// resolved rule answers a different command are skipped. Ambiguous
    /// rules and decode failures abort the call.
    pub fn decode_response(&self, model_year: u16, frames: &[CanFrame]) -> Result<Vec<DecodedSignal>> {
        let response = self.reassemble(frames)?;
        if let [NEGATIVE_RESPONSE, service, code, ..] = response.payload[..] {
            return Err(DecoderError::NegativeResponse { service, code });
        }

        let mut decoded = Vec::new();
        for definition in self.catalog.iter() {
            if self.config.check_response_id && !definition.response.matches(response.can_id) {
                continue;
            }
            let rule = match resolver::resolve(definition, model_year) {
                Ok(rule) => rule,
                Err(DecoderError::NoApplicableRule { .. }) => continue,
                Err(e) => return Err(e),
            };
            if !response
                .payload
                .starts_with(&rule.command.positive_response_prefix())
            {
                continue;
            }
            decoded.push(self.decode_with_rule(definition, rule, &response)?);
        }

        log::debug!(
            "Decoded {} signals from response of 0x{:X} ({} bytes)",
            decoded.len(),
            response.can_id,
            response.payload.len()
        );
        Ok(decoded)
    }

    fn decode_with_rule(
        &self,
        definition: &SignalDefinition,
        rule: &SignalRule,
        response: &Response,
    ) -> Result<DecodedSignal> {
        if self.config.check_response_id && !definition.response.matches(response.can_id) {
            return Err(DecoderError::ResponderMismatch {
                signal: definition.name.clone(),
                found: response.can_id,
            });
        }

        let data = strip_echo(&response.payload, &rule.command)?;
        let (value, raw_value) = SignalDecoder::decode_with_raw(data, rule)?;

        log::trace!("{} [{}] = {}", definition.name, rule.command, value);

        Ok(DecodedSignal {
            name: definition.name.clone(),
            value,
            unit: rule.unit.clone(),
            value_description: raw_value.and_then(|raw| rule.value_map.get(&raw)).cloned(),
            raw_value,
        })
    }
}

/// Check the positive-response echo and return the data after it
fn strip_echo<'p>(payload: &'p [u8], command: &Command) -> Result<&'p [u8]> {
    if let [NEGATIVE_RESPONSE, service, code, ..] = *payload {
        return Err(DecoderError::NegativeResponse { service, code });
    }

    let prefix = command.positive_response_prefix();
    match payload.strip_prefix(prefix.as_slice()) {
        Some(data) => Ok(data),
        None => {
            let found = payload[..payload.len().min(prefix.len())].to_vec();
            Err(DecoderError::UnexpectedResponse {
                expected: prefix,
                found,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::signalset::parse_signalset;
    use crate::types::{ProtocolError, SignalValue};

    const SIGNALSET: &str = r#"{"commands": [
        {"hdr": "18DA60F1", "cmd": {"22": "7028"}, "signals": [
            {"id": "CIVIC_AAT", "fmt": {"bix": 136, "len": 8, "add": -40, "unit": "celsius"}}]},
        {"hdr": "18DA10F1", "cmd": {"22": "2660"}, "filter": {"from": 2018}, "signals": [
            {"id": "CIVIC_ODO", "fmt": {"bix": 344, "len": 24, "unit": "kilometers"}},
            {"id": "CIVIC_RUNTM", "fmt": {"bix": 368, "len": 16, "unit": "minutes"}}]},
        {"hdr": "7E0", "cmd": {"01": "05"}, "signals": [
            {"id": "COOLANT", "fmt": {"bix": 0, "len": 8, "add": -40, "map": {"255": "Sensor fault"}}}]}
    ]}"#;

    const AAT_2016: &str = "
18DAF1601039627028F8F000
18DAF1602100000004040100
18DAF1602200000000004E00
18DAF160234C000000000000
18DAF1602400000000000000
18DAF1602500000000000000
18DAF1602600000000000000
18DAF1602700000000000000
18DAF1602800005555555555
";

    const ODO_2018: &str = "
18DAF1101039622660801FFF
18DAF11021F3F7F000000000
18DAF1102200000000000000
18DAF110230000042D1B0101
18DAF1102400040040008300
18DAF110250103840000082C
18DAF1102605D60547000143
18DAF1102796001500000000
18DAF1102800005555555555
";

    fn catalog() -> SignalCatalog {
        parse_signalset(SIGNALSET).unwrap()
    }

    #[test]
    fn test_decode_capture_offset() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let aat = decoder.decode_capture(2016, AAT_2016, "CIVIC_AAT").unwrap();
        assert_eq!(aat.value, SignalValue::Integer(36));
        assert_eq!(aat.raw_value, Some(0x4C));
        assert_eq!(aat.unit.as_deref(), Some("celsius"));
    }

    #[test]
    fn test_decode_response_returns_every_signal_of_command() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let frames = decoder.parse_capture(ODO_2018).unwrap();

        let decoded = decoder.decode_response(2018, &frames).unwrap();
        let values: Vec<(&str, SignalValue)> =
            decoded.iter().map(|d| (d.name.as_str(), d.value)).collect();
        assert_eq!(
            values,
            vec![
                ("CIVIC_ODO", SignalValue::Integer(82838)),
                ("CIVIC_RUNTM", SignalValue::Integer(21)),
            ]
        );

        // no rule before 2018: skipped, not an error
        assert!(decoder.decode_response(2016, &frames).unwrap().is_empty());
    }

    #[test]
    fn test_decode_payload_reuses_reassembly() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let frames = decoder.parse_capture(ODO_2018).unwrap();
        let response = decoder.reassemble(&frames).unwrap();
        assert_eq!(response.can_id, 0x18DAF110);
        assert_eq!(response.payload.len(), 57);

        let odo = decoder.decode_payload(2018, &response, "CIVIC_ODO").unwrap();
        let runtm = decoder.decode_payload(2018, &response, "CIVIC_RUNTM").unwrap();
        assert_eq!(odo.value, SignalValue::Integer(82838));
        assert_eq!(runtm.value, SignalValue::Integer(21));
    }

    #[test]
    fn test_no_applicable_rule() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let result = decoder.decode_capture(2016, ODO_2018, "CIVIC_ODO");
        assert!(matches!(result, Err(DecoderError::NoApplicableRule { model_year: 2016, .. })));
    }

    #[test]
    fn test_unknown_signal() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let result = decoder.decode_capture(2018, ODO_2018, "CIVIC_SPEED");
        assert!(matches!(result, Err(DecoderError::SignalNotFound(_))));
    }

    #[test]
    fn test_responder_mismatch() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let result = decoder.decode_capture(2018, AAT_2016, "CIVIC_ODO");
        assert!(matches!(
            result,
            Err(DecoderError::ResponderMismatch { found: 0x18DAF160, .. })
        ));

        // with the check off the echo still rejects the wrong command
        let decoder = Decoder::new(&catalog, DecoderConfig::new().with_response_id_check(false));
        let result = decoder.decode_capture(2018, AAT_2016, "CIVIC_ODO");
        assert!(matches!(result, Err(DecoderError::UnexpectedResponse { .. })));
    }

    #[test]
    fn test_negative_response() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let result = decoder.decode_capture(2016, "18DAF160037F2231", "CIVIC_AAT");
        assert!(matches!(
            result,
            Err(DecoderError::NegativeResponse { service: 0x22, code: 0x31 })
        ));
    }

    #[test]
    fn test_standard_id_single_frame_with_value_map() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let coolant = decoder.decode_capture(2020, "7E8034105FF", "COOLANT").unwrap();
        assert_eq!(coolant.value, SignalValue::Integer(215));
        assert_eq!(coolant.value_description.as_deref(), Some("Sensor fault"));
    }

    #[test]
    fn test_sequence_violation_surfaces_as_protocol_error() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        let capture = "
18DAF1101039622660801FFF
18DAF11021F3F7F000000000
18DAF1102300000000000000
";
        let result = decoder.decode_capture(2018, capture, "CIVIC_ODO");
        assert!(matches!(
            result,
            Err(DecoderError::Protocol(ProtocolError::SequenceViolation {
                expected: 2,
                found: 3
            }))
        ));
    }

    #[test]
    fn test_truncated_payload_is_out_of_range() {
        let catalog = catalog();
        let decoder = Decoder::new(&catalog, DecoderConfig::new());
        // complete single-frame response that is too short for bit 344
        let result = decoder.decode_capture(2018, "18DAF11006622660000102", "CIVIC_ODO");
        assert!(matches!(result, Err(DecoderError::Decode(_))));
    }
}
