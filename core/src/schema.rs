//! Typed module field schema.
//!
//! # Design
//! The vendor's `fields?includeDetails=true` payload is an object keyed by
//! field key, each value a loose bag of attributes. `ModuleSchema` turns it
//! into a lookup table of `FieldDescriptor`s addressable by field key or by
//! display label, so request validation never walks raw JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RadiusError, Result};

/// Field key every module accepts, whether or not the schema lists it.
pub const ENTITY_ID: &str = "Entity ID";

/// Data type of a field, with permissible values where the vendor lists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
    Picklist(Vec<String>),
    MultiSelect(Vec<String>),
    /// A vendor type not modelled above; the raw name plus any possible values.
    Other(String, Option<Vec<String>>),
}

impl FieldType {
    fn from_vendor(data_type: &str, possible_values: Option<Vec<String>>) -> Self {
        match (data_type.to_ascii_lowercase().as_str(), possible_values) {
            ("multi-select", values) => FieldType::MultiSelect(values.unwrap_or_default()),
            ("picklist" | "pick list" | "select" | "drop-down", values) => {
                FieldType::Picklist(values.unwrap_or_default())
            }
            (_, Some(values)) if !values.is_empty() && !is_scalar_type(data_type) => {
                FieldType::Picklist(values)
            }
            ("text" | "string" | "text area" | "email" | "phone" | "url", None) => FieldType::Text,
            ("number" | "integer" | "decimal" | "currency", None) => FieldType::Number,
            ("date", None) => FieldType::Date,
            ("boolean" | "checkbox" | "yes/no", None) => FieldType::Boolean,
            (_, values) => FieldType::Other(data_type.to_string(), values),
        }
    }

    /// Permissible values, if the field restricts them. A picklist whose
    /// metadata declares no values accepts anything.
    pub fn possible_values(&self) -> Option<&[String]> {
        let values = match self {
            FieldType::Picklist(values) | FieldType::MultiSelect(values) => values,
            FieldType::Other(_, Some(values)) => values,
            _ => return None,
        };
        (!values.is_empty()).then_some(values.as_slice())
    }
}

fn is_scalar_type(data_type: &str) -> bool {
    matches!(
        data_type.to_ascii_lowercase().as_str(),
        "text" | "string" | "number" | "integer" | "decimal" | "currency" | "date" | "boolean"
    )
}

/// One field of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub key: String,
    pub display_label: Option<String>,
    pub data_type: FieldType,
    pub required: bool,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(rename = "Display Label")]
    display_label: Option<String>,
    #[serde(rename = "Data Type", default)]
    data_type: Option<String>,
    #[serde(rename = "Required", default)]
    required: Option<Value>,
    #[serde(rename = "Possible Values", default)]
    possible_values: Option<Vec<Value>>,
}

/// Read-only field table for one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleSchema {
    module: String,
    fields: Vec<FieldDescriptor>,
    by_key: HashMap<String, usize>,
    by_label: HashMap<String, usize>,
}

impl ModuleSchema {
    pub fn new(module: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let mut by_key = HashMap::with_capacity(fields.len());
        let mut by_label = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            by_key.insert(field.key.clone(), idx);
            if let Some(label) = &field.display_label {
                by_label.entry(label.clone()).or_insert(idx);
            }
        }
        Self {
            module: module.into(),
            fields,
            by_key,
            by_label,
        }
    }

    /// Build a schema from the detailed `fields` payload.
    pub fn from_payload(module: impl Into<String>, payload: &Value) -> Result<Self> {
        let module = module.into();
        let object = payload.as_object().ok_or_else(|| {
            RadiusError::Deserialization(format!(
                "field details for module <{module}> are not a JSON object"
            ))
        })?;

        let mut fields = Vec::with_capacity(object.len());
        for (key, raw) in object {
            let raw: RawField = serde_json::from_value(raw.clone())
                .map_err(|e| RadiusError::Deserialization(format!("field <{key}>: {e}")))?;
            let possible_values = raw
                .possible_values
                .map(|values| values.iter().filter_map(value_as_text).collect::<Vec<_>>())
                .filter(|values| !values.is_empty());
            fields.push(FieldDescriptor {
                key: key.clone(),
                display_label: raw.display_label,
                data_type: FieldType::from_vendor(raw.data_type.as_deref().unwrap_or("Text"), possible_values),
                required: raw.required.as_ref().map(is_truthy).unwrap_or(false),
            });
        }
        Ok(Self::new(module, fields))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a field by key first, then by display label.
    pub fn lookup(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_key
            .get(name)
            .or_else(|| self.by_label.get(name))
            .map(|&idx| &self.fields[idx])
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Render a scalar JSON value the way the vendor compares it.
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Field names from a non-detailed `fields` payload: either an array of
/// names or an object keyed by name.
pub(crate) fn field_names(payload: &Value) -> Result<Vec<String>> {
    match payload {
        Value::Array(items) => Ok(items.iter().filter_map(value_as_text).collect()),
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        other => Err(RadiusError::Deserialization(format!(
            "unexpected field list payload: {other}"
        ))),
    }
}
