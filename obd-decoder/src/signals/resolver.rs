//! Model-year rule resolution
//!
//! Picks the one rule of a signal that applies to a model year. Windows that
//! overlap for the requested year are an authoring defect in the signal set
//! and are reported, never resolved by position.

use crate::signals::catalog::{SignalDefinition, SignalRule};
use crate::types::{DecoderError, Result};

/// Select the rule of `definition` whose window contains `model_year`
pub fn resolve(definition: &SignalDefinition, model_year: u16) -> Result<&SignalRule> {
    let mut matching = definition
        .rules
        .iter()
        .filter(|rule| rule.window.contains(model_year));

    let Some(rule) = matching.next() else {
        return Err(DecoderError::NoApplicableRule {
            signal: definition.name.clone(),
            model_year,
        });
    };

    let extra = matching.count();
    if extra > 0 {
        return Err(DecoderError::AmbiguousRule {
            signal: definition.name.clone(),
            model_year,
            candidates: extra + 1,
        });
    }

    log::trace!(
        "{} MY{} -> rule for {}",
        definition.name,
        model_year,
        rule.window
    );
    Ok(rule)
}
