//! Signal catalog, signal-set loader and formatter
//!
//! This module contains the in-memory catalog, the model-year resolver and
//! the JSON signal-set format that feeds them.

pub mod catalog;
pub mod formatter;
pub mod formula;
pub mod resolver;
pub mod signalset;

// Re-export key types for convenience
pub use catalog::{
    BitField, ByteOrder, CatalogStats, Command, NamedField, ResponsePattern, RuleOverlap, Scalar,
    SignalCatalog, SignalDefinition, SignalRule, Transform, ValueType, YearWindow,
};
pub use formula::Expr;
pub use resolver::resolve;
pub use signalset::{load_signalset_file, parse_signalset, SignalSetDocument};
