//! Presence and format checks for a view's caller-supplied parameters.

use crate::{
    error::{Result, ServiceError},
    registry::ViewDefinition,
    time::{parse_parameter, sql_literal, DateFormat},
};
use std::collections::HashMap;

/// Quoted SQL literals, in declared order, ready for template substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedParameters {
    pub required: Vec<String>,
    /// Only the optional parameters the caller actually supplied.
    pub optional: Vec<String>,
    /// Names matching `optional`, position for position.
    pub optional_names: Vec<String>,
}

/// Validates `raw` against `view`. Every missing required name is reported
/// together; a badly formatted value fails on the first offender.
pub fn validate(
    view: &ViewDefinition,
    raw: &HashMap<String, String>,
    format: &DateFormat,
) -> Result<ValidatedParameters> {
    let mut missing = Vec::new();
    let mut required = Vec::with_capacity(view.required_parameters.len());

    for name in &view.required_parameters {
        match supplied(raw, name) {
            None => missing.push(name.clone()),
            Some(value) => required.push(to_literal(name, value, format)?),
        }
    }

    if !missing.is_empty() {
        return Err(ServiceError::MissingParameters(missing));
    }

    let mut optional = Vec::new();
    let mut optional_names = Vec::new();
    for name in &view.optional_parameters {
        if let Some(value) = supplied(raw, name) {
            optional.push(to_literal(name, value, format)?);
            optional_names.push(name.clone());
        }
    }

    Ok(ValidatedParameters {
        required,
        optional,
        optional_names,
    })
}

/// Empty values count as absent.
fn supplied<'a>(raw: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    raw.get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn to_literal(name: &str, value: &str, format: &DateFormat) -> Result<String> {
    let parsed = parse_parameter(value)
        .ok_or_else(|| ServiceError::InvalidParameterFormat(name.to_string()))?;
    Ok(sql_literal(&parsed, format))
}
