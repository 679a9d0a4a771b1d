//! Signal catalog
//!
//! In-memory form of one vehicle's signal set. A catalog is built once by the
//! loader and only read afterwards, so it can be shared by reference between
//! any number of concurrent decode calls.

use crate::signals::formula::Expr;
use crate::types::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Most significant byte first (default for diagnostic responses)
    #[default]
    #[serde(rename = "big")]
    BigEndian,
    /// Least significant byte first (Intel bit numbering)
    #[serde(rename = "little")]
    LittleEndian,
}

impl ByteOrder {
    pub fn is_big_endian(&self) -> bool {
        *self == ByteOrder::BigEndian
    }
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Two's-complement signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Location and encoding of one bit field within a response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Offset of the field, counted from the most significant bit of byte 0
    pub bit_offset: u32,
    /// Length in bits (1..=64)
    pub bit_length: u32,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
}

impl BitField {
    /// Unsigned big-endian field
    pub fn unsigned(bit_offset: u32, bit_length: u32) -> Self {
        Self {
            bit_offset,
            bit_length,
            byte_order: ByteOrder::BigEndian,
            value_type: ValueType::Unsigned,
        }
    }

    /// Signed big-endian field
    pub fn signed(bit_offset: u32, bit_length: u32) -> Self {
        Self {
            value_type: ValueType::Signed,
            ..Self::unsigned(bit_offset, bit_length)
        }
    }

    /// First bit past the end of the field
    pub fn end_bit(&self) -> u64 {
        self.bit_offset as u64 + self.bit_length as u64
    }
}

/// A numeric constant that remembers whether it was written as an integer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Float(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// A sub-field a formula can refer to by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedField {
    pub name: String,
    pub field: BitField,
}

/// How the raw field becomes a physical value
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// `raw * mul / div + add`, in that order
    Affine {
        mul: Scalar,
        div: Option<Scalar>,
        add: Scalar,
    },
    /// Expression over `raw` and named sub-fields of the same payload
    Formula { fields: Vec<NamedField>, expr: Expr },
}

impl Transform {
    /// The identity transform: the raw value is the physical value
    pub fn identity() -> Self {
        Transform::Affine {
            mul: Scalar::Int(1),
            div: None,
            add: Scalar::Int(0),
        }
    }

    /// `raw + add`
    pub fn offset(add: i64) -> Self {
        Transform::Affine {
            mul: Scalar::Int(1),
            div: None,
            add: Scalar::Int(add),
        }
    }
}

/// Diagnostic request a rule answers: service byte plus identifier bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    pub service: u8,
    pub identifier: Vec<u8>,
}

impl Command {
    pub fn new(service: u8, identifier: impl Into<Vec<u8>>) -> Self {
        Self {
            service,
            identifier: identifier.into(),
        }
    }

    /// Bytes a positive response starts with
    pub fn positive_response_prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(1 + self.identifier.len());
        prefix.push(self.service.wrapping_add(0x40));
        prefix.extend_from_slice(&self.identifier);
        prefix
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} ", self.service)?;
        for byte in &self.identifier {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Inclusive model-year applicability window
///
/// `from`/`to` bound a range (either may be open). `years` lists extra years.
/// A window with only `years` matches exactly those years; a window with
/// nothing set matches every year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearWindow {
    pub from: Option<u16>,
    pub to: Option<u16>,
    pub years: Vec<u16>,
}

impl YearWindow {
    /// Window matching every model year
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(from: Option<u16>, to: Option<u16>) -> Self {
        Self {
            from,
            to,
            years: Vec::new(),
        }
    }

    fn range(&self) -> Option<(u16, u16)> {
        if self.from.is_none() && self.to.is_none() && !self.years.is_empty() {
            None
        } else {
            Some((self.from.unwrap_or(u16::MIN), self.to.unwrap_or(u16::MAX)))
        }
    }

    pub fn contains(&self, model_year: u16) -> bool {
        let in_range = self
            .range()
            .is_some_and(|(lo, hi)| lo <= model_year && model_year <= hi);
        in_range || self.years.contains(&model_year)
    }

    /// True if some model year matches both windows
    pub fn overlaps(&self, other: &YearWindow) -> bool {
        if let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (self.range(), other.range()) {
            if a_lo.max(b_lo) <= a_hi.min(b_hi) {
                return true;
            }
        }
        self.years.iter().any(|y| other.contains(*y)) || other.years.iter().any(|y| self.contains(*y))
    }
}

impl fmt::Display for YearWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range() {
            Some((u16::MIN, u16::MAX)) => write!(f, "all years")?,
            Some((lo, u16::MAX)) => write!(f, "{}..", lo)?,
            Some((u16::MIN, hi)) => write!(f, "..={}", hi)?,
            Some((lo, hi)) => write!(f, "{}..={}", lo, hi)?,
            None => {}
        }
        if !self.years.is_empty() {
            if self.range().is_some() {
                write!(f, " + ")?;
            }
            write!(f, "{:?}", self.years)?;
        }
        Ok(())
    }
}

/// Which responders a signal accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePattern {
    /// Any module may answer (functional requests)
    Any,
    /// Only this arbitration ID
    Exact(u32),
}

impl ResponsePattern {
    pub fn matches(&self, can_id: u32) -> bool {
        match self {
            ResponsePattern::Any => true,
            ResponsePattern::Exact(id) => *id == can_id,
        }
    }

    /// Responder implied by a request header, if the addressing scheme fixes one
    ///
    /// 11-bit: `7DF` is functional, `7E0..=7E7` answer on `+8`.
    /// 29-bit: `18DB33F1` is functional, `18DA<tgt><src>` answers on
    /// `18DA<src><tgt>`.
    pub fn from_request(request_id: u32, is_extended: bool) -> Option<Self> {
        if is_extended {
            match request_id & 0xFFFF_0000 {
                0x18DB_0000 => Some(ResponsePattern::Any),
                0x18DA_0000 => {
                    let target = (request_id >> 8) & 0xFF;
                    let source = request_id & 0xFF;
                    Some(ResponsePattern::Exact(0x18DA_0000 | (source << 8) | target))
                }
                _ => None,
            }
        } else {
            match request_id {
                0x7DF => Some(ResponsePattern::Any),
                0x7E0..=0x7E7 => Some(ResponsePattern::Exact(request_id + 8)),
                _ => None,
            }
        }
    }
}

impl fmt::Display for ResponsePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponsePattern::Any => write!(f, "any"),
            ResponsePattern::Exact(id) => write!(f, "0x{:X}", id),
        }
    }
}

/// Year-scoped decoding rule for one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRule {
    pub command: Command,
    pub window: YearWindow,
    /// Primary field (`raw` in formulas)
    pub field: BitField,
    pub transform: Transform,
    pub unit: Option<String>,
    /// Minimum physical value (display hint)
    pub min: Option<f64>,
    /// Maximum physical value (display hint)
    pub max: Option<f64>,
    /// Raw value -> description
    pub value_map: BTreeMap<i64, String>,
}

impl SignalRule {
    /// Rule with an identity transform and no metadata
    pub fn new(command: Command, window: YearWindow, field: BitField) -> Self {
        Self {
            command,
            window,
            field,
            transform: Transform::identity(),
            unit: None,
            min: None,
            max: None,
            value_map: BTreeMap::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A logical signal and its candidate rules
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    /// Signal identifier, unique within a catalog
    pub name: String,
    pub request_id: u32,
    pub response: ResponsePattern,
    pub rules: Vec<SignalRule>,
    /// Human readable name
    pub display_name: Option<String>,
    /// Grouping path (e.g., "Trips")
    pub path: Option<String>,
    pub description: Option<String>,
}

impl SignalDefinition {
    pub fn new(name: impl Into<String>, request_id: u32, response: ResponsePattern) -> Self {
        Self {
            name: name.into(),
            request_id,
            response,
            rules: Vec::new(),
            display_name: None,
            path: None,
            description: None,
        }
    }

    pub fn with_rule(mut self, rule: SignalRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Two rules of one signal whose windows share a model year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOverlap {
    pub signal: String,
    pub first: usize,
    pub second: usize,
    pub first_window: String,
    pub second_window: String,
}

impl fmt::Display for RuleOverlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: rule #{} ({}) overlaps rule #{} ({})",
            self.signal, self.first, self.first_window, self.second, self.second_window
        )
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    /// Number of signal definitions
    pub num_signals: usize,
    /// Number of rules across all definitions
    pub num_rules: usize,
    /// Number of distinct commands
    pub num_commands: usize,
}

/// Ordered, read-only collection of signal definitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalCatalog {
    definitions: Vec<SignalDefinition>,
    /// Signal name -> index into `definitions`
    index: HashMap<String, usize>,
}

impl SignalCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, rejecting duplicate signal names
    pub fn from_definitions(definitions: Vec<SignalDefinition>) -> Result<Self> {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.add_definition(definition)?;
        }
        Ok(catalog)
    }

    fn add_definition(&mut self, definition: SignalDefinition) -> Result<()> {
        if self.index.contains_key(&definition.name) {
            return Err(DecoderError::InvalidSignalDefinition(format!(
                "duplicate signal id {}",
                definition.name
            )));
        }
        if definition.rules.is_empty() {
            return Err(DecoderError::InvalidSignalDefinition(format!(
                "signal {} has no rules",
                definition.name
            )));
        }
        self.index
            .insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    /// Look up a signal by name
    pub fn find(&self, name: &str) -> Result<&SignalDefinition> {
        self.get(name)
            .ok_or_else(|| DecoderError::SignalNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&SignalDefinition> {
        self.index.get(name).map(|&idx| &self.definitions[idx])
    }

    /// Definitions in load order
    pub fn iter(&self) -> impl Iterator<Item = &SignalDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Get catalog statistics
    pub fn stats(&self) -> CatalogStats {
        let commands: HashSet<(u32, &Command)> = self
            .definitions
            .iter()
            .flat_map(|def| def.rules.iter().map(move |rule| (def.request_id, &rule.command)))
            .collect();

        CatalogStats {
            num_signals: self.definitions.len(),
            num_rules: self.definitions.iter().map(|d| d.rules.len()).sum(),
            num_commands: commands.len(),
        }
    }

    /// Every pair of rules in one definition whose windows share a model year
    pub fn overlaps(&self) -> Vec<RuleOverlap> {
        let mut found = Vec::new();
        for def in &self.definitions {
            for (i, a) in def.rules.iter().enumerate() {
                for (j, b) in def.rules.iter().enumerate().skip(i + 1) {
                    if a.window.overlaps(&b.window) {
                        found.push(RuleOverlap {
                            signal: def.name.clone(),
                            first: i,
                            second: j,
                            first_window: a.window.to_string(),
                            second_window: b.window.to_string(),
                        });
                    }
                }
            }
        }
        found
    }
}
