//! Signal-set file loader
//!
//! Parses signal-set JSON documents and converts them into our internal
//! catalog format. The document groups signals under the diagnostic command
//! that returns them; the catalog groups rules under the signal they decode.
//! A signal id that appears under several commands (typically with different
//! model-year filters) becomes one definition with one rule per occurrence.

use crate::signals::catalog::{
    BitField, ByteOrder, Command, NamedField, ResponsePattern, Scalar, SignalCatalog,
    SignalDefinition, SignalRule, Transform, ValueType, YearWindow,
};
use crate::signals::formula::Expr;
use crate::types::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level signal-set document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalSetDocument {
    pub commands: Vec<CommandDocument>,
}

/// One diagnostic command and the signals in its response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDocument {
    /// Request header (3 or 8 hex digits)
    pub hdr: String,
    /// Response header; derived from `hdr` when absent, `"*"` for any responder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rax: Option<String>,
    /// Service byte -> identifier, e.g. `{"22": "2660"}`
    pub cmd: BTreeMap<String, String>,
    /// Suggested polling period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterDocument>,
    pub signals: Vec<SignalDocument>,
}

/// Model-year filter of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub years: Vec<u16>,
}

/// One signal in a command's response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub fmt: FormatDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Bit location, encoding and scaling of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatDocument {
    pub bix: u32,
    pub len: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sign: bool,
    #[serde(default, skip_serializing_if = "ByteOrder::is_big_endian")]
    pub order: ByteOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mul: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub div: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, String>,
}

/// Named sub-field used by a formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDocument {
    pub name: String,
    pub bix: u32,
    pub len: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sign: bool,
    #[serde(default, skip_serializing_if = "ByteOrder::is_big_endian")]
    pub order: ByteOrder,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SignalSetDocument {
    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DecoderError::CatalogParse(e.to_string()))
    }

    /// Convert into a validated catalog
    pub fn to_catalog(&self) -> Result<SignalCatalog> {
        let mut definitions: Vec<SignalDefinition> = Vec::new();

        for command_doc in &self.commands {
            let (request_id, is_extended) = parse_header(&command_doc.hdr)?;
            let response = match command_doc.rax.as_deref() {
                Some("*") => ResponsePattern::Any,
                Some(rax) => ResponsePattern::Exact(parse_header(rax)?.0),
                None => ResponsePattern::from_request(request_id, is_extended).ok_or_else(|| {
                    DecoderError::InvalidSignalDefinition(format!(
                        "cannot derive a response header from {}; set \"rax\"",
                        command_doc.hdr
                    ))
                })?,
            };
            let command = parse_command(&command_doc.cmd)?;
            let window = parse_window(command_doc.filter.as_ref())?;

            for signal_doc in &command_doc.signals {
                let rule = convert_rule(signal_doc, command.clone(), window.clone())?;

                match definitions.iter_mut().find(|d| d.name == signal_doc.id) {
                    Some(existing) => {
                        if existing.request_id != request_id || existing.response != response {
                            return Err(DecoderError::InvalidSignalDefinition(format!(
                                "signal {} is requested from more than one header",
                                signal_doc.id
                            )));
                        }
                        existing.rules.push(rule);
                    }
                    None => {
                        let mut definition =
                            SignalDefinition::new(signal_doc.id.clone(), request_id, response);
                        definition.display_name = signal_doc.name.clone();
                        definition.path = signal_doc.path.clone();
                        definition.description = signal_doc.description.clone();
                        definition.rules.push(rule);
                        definitions.push(definition);
                    }
                }
            }
        }

        let catalog = SignalCatalog::from_definitions(definitions)?;
        for overlap in catalog.overlaps() {
            log::warn!("Overlapping model-year windows: {}", overlap);
        }
        Ok(catalog)
    }
}

/// Parse signal-set JSON text into a catalog
pub fn parse_signalset(text: &str) -> Result<SignalCatalog> {
    SignalSetDocument::from_json(text)?.to_catalog()
}

/// Parse a signal-set file and return its catalog
pub fn load_signalset_file(path: &Path) -> Result<SignalCatalog> {
    log::info!("Loading signal set: {:?}", path);

    let text = std::fs::read_to_string(path)?;
    let catalog = parse_signalset(&text)?;

    let stats = catalog.stats();
    log::info!(
        "Loaded {} signals ({} rules, {} commands) from {:?}",
        stats.num_signals,
        stats.num_rules,
        stats.num_commands,
        path
    );
    Ok(catalog)
}

/// Parse a 3- or 8-digit hex header, returning the ID and whether it is 29-bit
fn parse_header(text: &str) -> Result<(u32, bool)> {
    let is_extended = match text.len() {
        3 => false,
        8 => true,
        _ => {
            return Err(DecoderError::InvalidSignalDefinition(format!(
                "header {:?} must have 3 or 8 hex digits",
                text
            )))
        }
    };
    if let Some(bad) = text.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DecoderError::InvalidSignalDefinition(format!(
            "header {:?} has non-hex character {:?}",
            text, bad
        )));
    }
    let id = u32::from_str_radix(text, 16).map_err(|e| {
        DecoderError::InvalidSignalDefinition(format!("header {:?}: {}", text, e))
    })?;
    Ok((id, is_extended))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    hex::decode(text)
        .map_err(|e| DecoderError::InvalidSignalDefinition(format!("{:?}: {}", text, e)))
}

fn parse_command(cmd: &BTreeMap<String, String>) -> Result<Command> {
    let mut entries = cmd.iter();
    let (Some((service, identifier)), None) = (entries.next(), entries.next()) else {
        return Err(DecoderError::InvalidSignalDefinition(format!(
            "\"cmd\" must have exactly one service, found {}",
            cmd.len()
        )));
    };
    let service = match parse_hex_bytes(service)?.as_slice() {
        [byte] => *byte,
        _ => {
            return Err(DecoderError::InvalidSignalDefinition(format!(
                "service {:?} must be one byte",
                service
            )))
        }
    };
    Ok(Command::new(service, parse_hex_bytes(identifier)?))
}

fn parse_window(filter: Option<&FilterDocument>) -> Result<YearWindow> {
    let Some(filter) = filter else {
        return Ok(YearWindow::unbounded());
    };
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(DecoderError::InvalidSignalDefinition(format!(
                "filter from {} is after to {}",
                from, to
            )));
        }
    }
    let mut years = filter.years.clone();
    years.sort_unstable();
    years.dedup();
    Ok(YearWindow {
        from: filter.from,
        to: filter.to,
        years,
    })
}

fn convert_field(bix: u32, len: u32, sign: bool, order: ByteOrder, signal: &str) -> Result<BitField> {
    if !(1..=64).contains(&len) {
        return Err(DecoderError::InvalidSignalDefinition(format!(
            "{}: bit length {} outside 1..=64",
            signal, len
        )));
    }
    Ok(BitField {
        bit_offset: bix,
        bit_length: len,
        byte_order: order,
        value_type: if sign {
            ValueType::Signed
        } else {
            ValueType::Unsigned
        },
    })
}

fn convert_rule(doc: &SignalDocument, command: Command, window: YearWindow) -> Result<SignalRule> {
    let fmt = &doc.fmt;
    let invalid = |reason: String| DecoderError::InvalidSignalDefinition(format!("{}: {}", doc.id, reason));

    let field = convert_field(fmt.bix, fmt.len, fmt.sign, fmt.order, &doc.id)?;

    let transform = match &fmt.expr {
        Some(expr) => {
            if fmt.mul.is_some() || fmt.div.is_some() || fmt.add.is_some() {
                return Err(invalid("\"expr\" cannot be combined with mul/div/add".to_string()));
            }
            let mut fields = Vec::with_capacity(fmt.fields.len());
            for field_doc in &fmt.fields {
                if field_doc.name == "raw" || fields.iter().any(|f: &NamedField| f.name == field_doc.name) {
                    return Err(invalid(format!("duplicate field name {:?}", field_doc.name)));
                }
                fields.push(NamedField {
                    name: field_doc.name.clone(),
                    field: convert_field(field_doc.bix, field_doc.len, field_doc.sign, field_doc.order, &doc.id)?,
                });
            }
            if let Some(unknown) = expr
                .field_names()
                .into_iter()
                .find(|name| !fields.iter().any(|f| f.name == *name))
            {
                return Err(invalid(format!("formula references unknown field {:?}", unknown)));
            }
            Transform::Formula {
                fields,
                expr: expr.clone(),
            }
        }
        None => {
            if !fmt.fields.is_empty() {
                return Err(invalid("\"fields\" requires an \"expr\"".to_string()));
            }
            if fmt.div.is_some_and(|div| div.as_f64() == 0.0) {
                return Err(invalid("\"div\" must not be zero".to_string()));
            }
            Transform::Affine {
                mul: fmt.mul.unwrap_or(Scalar::Int(1)),
                div: fmt.div,
                add: fmt.add.unwrap_or(Scalar::Int(0)),
            }
        }
    };

    let value_map = fmt
        .map
        .iter()
        .map(|(key, description)| {
            key.parse::<i64>()
                .map(|raw| (raw, description.clone()))
                .map_err(|_| invalid(format!("value map key {:?} is not an integer", key)))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(SignalRule {
        command,
        window,
        field,
        transform,
        unit: fmt.unit.clone(),
        min: fmt.min.map(|v| v.as_f64()),
        max: fmt.max.map(|v| v.as_f64()),
        value_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CIVIC: &str = r#"{
  "commands": [
    {
      "hdr": "18DA10F1",
      "cmd": { "22": "2660" },
      "filter": { "to": 2017 },
      "signals": [
        { "id": "CIVIC_ODO", "path": "Trips",
          "fmt": { "bix": 344, "len": 16,
                   "fields": [ { "name": "lo", "bix": 360, "len": 8 } ],
                   "expr": { "add": [ { "mul": [ "raw", { "const": 256 } ] }, { "field": "lo" } ] },
                   "unit": "kilometers" } }
      ]
    },
    {
      "hdr": "18DA10F1",
      "cmd": { "22": "2660" },
      "filter": { "from": 2018 },
      "signals": [
        { "id": "CIVIC_ODO", "fmt": { "bix": 344, "len": 24, "unit": "kilometers" } }
      ]
    },
    {
      "hdr": "7E0",
      "cmd": { "01": "05" },
      "signals": [
        { "id": "COOLANT", "fmt": { "bix": 0, "len": 8, "add": -40, "unit": "celsius",
                                    "map": { "255": "Sensor fault" } } }
      ]
    }
  ]
}"#;

    #[test]
    fn test_parse_merges_rules_by_signal_id() {
        let catalog = parse_signalset(CIVIC).unwrap();
        assert_eq!(catalog.len(), 2);

        let odo = catalog.find("CIVIC_ODO").unwrap();
        assert_eq!(odo.request_id, 0x18DA10F1);
        assert_eq!(odo.response, ResponsePattern::Exact(0x18DAF110));
        assert_eq!(odo.path.as_deref(), Some("Trips"));
        assert_eq!(odo.rules.len(), 2);
        assert!(matches!(odo.rules[0].transform, Transform::Formula { .. }));
        assert_eq!(odo.rules[0].window, YearWindow::between(None, Some(2017)));
        assert_eq!(odo.rules[1].field, BitField::unsigned(344, 24));
        assert_eq!(odo.rules[1].transform, Transform::identity());
        assert_eq!(odo.rules[1].command, Command::new(0x22, vec![0x26, 0x60]));
    }

    #[test]
    fn test_parse_standard_header_and_value_map() {
        let catalog = parse_signalset(CIVIC).unwrap();
        let coolant = catalog.find("COOLANT").unwrap();
        assert_eq!(coolant.response, ResponsePattern::Exact(0x7E8));
        assert_eq!(coolant.rules[0].command, Command::new(0x01, vec![0x05]));
        assert_eq!(coolant.rules[0].transform, Transform::offset(-40));
        assert_eq!(coolant.rules[0].value_map.get(&255).map(String::as_str), Some("Sensor fault"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let text = r#"{"commands": [{"hdr": "7E0", "cmd": {"01": "0D"}, "signals": [], "bogus": 1}]}"#;
        assert!(matches!(parse_signalset(text), Err(DecoderError::CatalogParse(_))));
    }

    #[test]
    fn test_formula_with_unknown_field_rejected() {
        let text = r#"{"commands": [{"hdr": "7E0", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8, "expr": {"field": "hi"}}}]}]}"#;
        assert!(matches!(
            parse_signalset(text),
            Err(DecoderError::InvalidSignalDefinition(msg)) if msg.contains("hi")
        ));
    }

    #[test]
    fn test_formula_mixed_with_affine_rejected() {
        let text = r#"{"commands": [{"hdr": "7E0", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8, "mul": 2, "expr": "raw"}}]}]}"#;
        assert!(matches!(
            parse_signalset(text),
            Err(DecoderError::InvalidSignalDefinition(_))
        ));
    }

    #[test]
    fn test_bad_bit_length_rejected() {
        let text = r#"{"commands": [{"hdr": "7E0", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 65}}]}]}"#;
        assert!(matches!(
            parse_signalset(text),
            Err(DecoderError::InvalidSignalDefinition(_))
        ));
    }

    #[test]
    fn test_conflicting_headers_rejected() {
        let text = r#"{"commands": [
            {"hdr": "7E0", "cmd": {"22": "1234"}, "signals": [{"id": "X", "fmt": {"bix": 0, "len": 8}}]},
            {"hdr": "7E1", "cmd": {"22": "1234"}, "signals": [{"id": "X", "fmt": {"bix": 0, "len": 8}}]}
        ]}"#;
        assert!(matches!(
            parse_signalset(text),
            Err(DecoderError::InvalidSignalDefinition(_))
        ));
    }

    #[test]
    fn test_signed_header_rejected() {
        let text = r#"{"commands": [{"hdr": "+7E", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8}}]}]}"#;
        assert!(matches!(
            parse_signalset(text),
            Err(DecoderError::InvalidSignalDefinition(msg)) if msg.contains("+7E")
        ));
    }

    #[test]
    fn test_malformed_command_hex_rejected() {
        for cmd in [r#"{"2Z": "1234"}"#, r#"{"22": "123"}"#, r#"{"22": "12G4"}"#] {
            let text = format!(
                r#"{{"commands": [{{"hdr": "7E0", "cmd": {}, "signals": [
                    {{"id": "X", "fmt": {{"bix": 0, "len": 8}}}}]}}]}}"#,
                cmd
            );
            assert!(
                matches!(parse_signalset(&text), Err(DecoderError::InvalidSignalDefinition(_))),
                "{} accepted",
                cmd
            );
        }
    }

    #[test]
    fn test_underivable_response_needs_rax() {
        let without = r#"{"commands": [{"hdr": "720", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8}}]}]}"#;
        assert!(parse_signalset(without).is_err());

        let with = r#"{"commands": [{"hdr": "720", "rax": "728", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8}}]}]}"#;
        let catalog = parse_signalset(with).unwrap();
        assert_eq!(catalog.find("X").unwrap().response, ResponsePattern::Exact(0x728));

        let any = r#"{"commands": [{"hdr": "720", "rax": "*", "cmd": {"22": "1234"}, "signals": [
            {"id": "X", "fmt": {"bix": 0, "len": 8}}]}]}"#;
        assert_eq!(parse_signalset(any).unwrap().find("X").unwrap().response, ResponsePattern::Any);
    }

    #[test]
    fn test_inverted_filter_rejected() {
        let text = r#"{"commands": [{"hdr": "7E0", "cmd": {"22": "1234"}, "filter": {"from": 2020, "to": 2018},
            "signals": [{"id": "X", "fmt": {"bix": 0, "len": 8}}]}]}"#;
        assert!(parse_signalset(text).is_err());
    }

    #[test]
    fn test_load_signalset_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CIVIC.as_bytes()).unwrap();

        let catalog = load_signalset_file(file.path()).unwrap();
        assert_eq!(catalog.stats().num_rules, 3);
        assert_eq!(catalog.stats().num_commands, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_signalset_file(Path::new("does/not/exist.json"));
        assert!(matches!(result, Err(DecoderError::IoError(_))));
    }
}
