// src/contract/validator.rs - Structural output validation
//
// Collects every violation rather than stopping at the first, so a quarantined
// output carries a complete diagnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::{json_type_name, FieldSchema, FieldType, OutputContract};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingField,
    TypeMismatch,
    OutOfRange,
    NotInEnum,
    Length,
    Unparseable,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::OutOfRange => "out_of_range",
            Self::NotInEnum => "not_in_enum",
            Self::Length => "length",
            Self::Unparseable => "unparseable",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contract violation, addressed by a `$.a.b[0]` style path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    pub kind: ViolationKind,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn first_kind(&self) -> Option<ViolationKind> {
        self.errors.first().map(|e| e.kind)
    }
}

/// Stateless validator shared by every run.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, contract: &OutputContract, value: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        check_node(&contract.schema, value, "$", &mut errors);
        ValidationReport::from_errors(errors)
    }

    /// Validate handler text that should contain JSON.
    pub fn validate_raw(&self, contract: &OutputContract, raw: &str) -> (Option<Value>, ValidationReport) {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                let report = self.validate(contract, &value);
                (Some(value), report)
            }
            Err(e) => (
                None,
                ValidationReport::from_errors(vec![ValidationError::new(
                    "$",
                    ViolationKind::Unparseable,
                    format!("output is not valid JSON: {e}"),
                )]),
            ),
        }
    }
}

fn check_node(schema: &FieldSchema, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    if value.is_null() && schema.nullable {
        return;
    }

    if !schema.field_type.matches(value) {
        errors.push(ValidationError::new(
            path,
            ViolationKind::TypeMismatch,
            format!(
                "expected {}, found {}",
                schema.field_type.as_str(),
                json_type_name(value)
            ),
        ));
        // Deeper checks on a value of the wrong shape only add noise.
        return;
    }

    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            errors.push(ValidationError::new(
                path,
                ViolationKind::NotInEnum,
                format!("{value} is not one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.minimum {
            if n < min {
                errors.push(ValidationError::new(
                    path,
                    ViolationKind::OutOfRange,
                    format!("{n} is below minimum {min}"),
                ));
            }
        }
        if let Some(max) = schema.maximum {
            if n > max {
                errors.push(ValidationError::new(
                    path,
                    ViolationKind::OutOfRange,
                    format!("{n} is above maximum {max}"),
                ));
            }
        }
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    };
    if let Some(len) = length {
        if schema.min_length.is_some_and(|min| len < min) || schema.max_length.is_some_and(|max| len > max) {
            errors.push(ValidationError::new(
                path,
                ViolationKind::Length,
                format!(
                    "length {len} outside [{}, {}]",
                    schema.min_length.map(|m| m.to_string()).unwrap_or_else(|| "0".into()),
                    schema.max_length.map(|m| m.to_string()).unwrap_or_else(|| "∞".into()),
                ),
            ));
        }
    }

    match value {
        Value::Object(map) => {
            for name in &schema.required {
                if !map.contains_key(name) {
                    errors.push(ValidationError::new(
                        format!("{path}.{name}"),
                        ViolationKind::MissingField,
                        format!("required field '{name}' is missing"),
                    ));
                }
            }
            for (name, child) in &schema.properties {
                if let Some(v) = map.get(name) {
                    check_node(child, v, &format!("{path}.{name}"), errors);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    check_node(item_schema, item, &format!("{path}[{i}]"), errors);
                }
            }
        }
        _ => {}
    }
}
