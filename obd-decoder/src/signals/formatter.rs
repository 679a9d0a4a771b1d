//! Canonical signal-set formatting
//!
//! Rewrites a signal-set document into one stable textual form so files can
//! be diffed and checked in CI. Formatting never changes what a file decodes
//! to: loading the formatted text gives the same catalog as the input.

use crate::signals::catalog::Scalar;
use crate::signals::signalset::{CommandDocument, FormatDocument, SignalSetDocument};
use crate::types::{DecoderError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Format signal-set JSON text canonically
pub fn format_signalset(text: &str) -> Result<String> {
    let mut document = SignalSetDocument::from_json(text)?;
    canonicalize(&mut document);
    to_canonical_string(&document)
}

/// Read a signal-set file and return its canonical text
pub fn format_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    let formatted = format_signalset(&text)?;
    if formatted != text {
        log::debug!("{:?} is not canonically formatted", path);
    }
    Ok(formatted)
}

/// Whether `text` is already in canonical form
pub fn is_canonical(text: &str) -> Result<bool> {
    Ok(format_signalset(text)? == text)
}

/// Normalize a document in place
pub fn canonicalize(document: &mut SignalSetDocument) {
    for command in &mut document.commands {
        canonicalize_command(command);
    }
}

/// Serialize with two-space indentation and a trailing newline
pub fn to_canonical_string(document: &SignalSetDocument) -> Result<String> {
    let mut text = serde_json::to_string_pretty(document)
        .map_err(|e| DecoderError::CatalogParse(e.to_string()))?;
    text.push('\n');
    Ok(text)
}

fn canonicalize_command(command: &mut CommandDocument) {
    command.hdr = command.hdr.to_ascii_uppercase();
    if let Some(rax) = command.rax.as_mut() {
        *rax = rax.to_ascii_uppercase();
    }
    command.cmd = std::mem::take(&mut command.cmd)
        .into_iter()
        .map(|(service, identifier)| (service.to_ascii_uppercase(), identifier.to_ascii_uppercase()))
        .collect::<BTreeMap<_, _>>();

    if let Some(filter) = command.filter.as_mut() {
        filter.years.sort_unstable();
        filter.years.dedup();
    }

    for signal in &mut command.signals {
        canonicalize_format(&mut signal.fmt);
    }
}

fn canonicalize_format(fmt: &mut FormatDocument) {
    if fmt.mul == Some(Scalar::Int(1)) {
        fmt.mul = None;
    }
    if fmt.add == Some(Scalar::Int(0)) {
        fmt.add = None;
    }
}
