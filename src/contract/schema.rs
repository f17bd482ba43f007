// src/contract/schema.rs - Declarative input/output contracts

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::infra::errors::TollgateError;

/// Primitive shape a value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    #[default]
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Any => "any",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }
}

/// Name of the JSON shape of a value, for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural schema for one node of a task output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, FieldSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSchema {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    /// Add a property; `required` also lists it in `required`.
    pub fn with_property(mut self, name: &str, schema: FieldSchema, required: bool) -> Self {
        if required && !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_items(mut self, items: FieldSchema) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Reject schemas that could never be satisfied or that mix shapes.
    pub(crate) fn check_well_formed(&self, contract_id: &str, path: &str) -> Result<(), TollgateError> {
        let invalid = |reason: String| TollgateError::InvalidContract {
            contract_id: contract_id.to_string(),
            path: path.to_string(),
            reason,
        };

        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(invalid(format!("minimum {min} exceeds maximum {max}")));
            }
        }
        if self.minimum.is_some_and(|m| !m.is_finite()) || self.maximum.is_some_and(|m| !m.is_finite()) {
            return Err(invalid("range bounds must be finite".into()));
        }
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(invalid(format!("min_length {min} exceeds max_length {max}")));
            }
        }
        if let Some(values) = &self.enum_values {
            if values.is_empty() {
                return Err(invalid("enum must list at least one value".into()));
            }
        }

        let object_like = matches!(self.field_type, FieldType::Object | FieldType::Any);
        if !object_like && (!self.properties.is_empty() || !self.required.is_empty()) {
            return Err(invalid(format!(
                "properties/required are only valid on objects, not {}",
                self.field_type.as_str()
            )));
        }
        if self.items.is_some() && !matches!(self.field_type, FieldType::Array | FieldType::Any) {
            return Err(invalid(format!(
                "items is only valid on arrays, not {}",
                self.field_type.as_str()
            )));
        }

        for (name, child) in &self.properties {
            child.check_well_formed(contract_id, &format!("{path}.{name}"))?;
        }
        if let Some(items) = &self.items {
            items.check_well_formed(contract_id, &format!("{path}[]"))?;
        }
        Ok(())
    }
}

/// Contract a task's output payload must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    pub id: String,
    #[serde(default)]
    pub schema: FieldSchema,
}

impl OutputContract {
    pub fn new(id: impl Into<String>, schema: FieldSchema) -> Self {
        Self {
            id: id.into(),
            schema,
        }
    }

    /// A contract that accepts any payload.
    pub fn any(id: impl Into<String>) -> Self {
        Self::new(id, FieldSchema::default())
    }

    pub fn check_well_formed(&self) -> Result<(), TollgateError> {
        if self.id.trim().is_empty() {
            return Err(TollgateError::InvalidContract {
                contract_id: String::new(),
                path: "$".into(),
                reason: "contract id must not be empty".into(),
            });
        }
        self.schema.check_well_formed(&self.id, "$")
    }
}

/// Input keys a task needs materialized before its handler runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputContract {
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputContract {
    /// Required keys absent from `inputs`.
    pub fn missing<'a>(&'a self, inputs: &serde_json::Map<String, Value>) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|k| !inputs.contains_key(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }
}
