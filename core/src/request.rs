//! Request-body construction and field validation.
//!
//! # Design
//! `build_request` is pure: it takes an already-fetched `ModuleSchema` and
//! never touches the network, so the session decides when schemas are
//! fetched or reused. Validation fails fast on the first offending field, in
//! the caller's insertion order.
//!
//! - Unknown fields are dropped (with a warning) unless `strict` is set.
//! - Values of fields with possible values are always checked.
//! - Multi-select scalars are wrapped into one-element lists, since the
//!   server rejects bare scalars for those fields.
//! - Search requests convert `mm/dd/YYYY` dates to ISO; the vendor displays
//!   dates one way and searches on the other.
//! - Return fields pass through untouched, since callers may need raw field
//!   IDs the schema does not list.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{RadiusError, Result};
use crate::schema::{value_as_text, FieldDescriptor, FieldType, ModuleSchema, ENTITY_ID};

/// Which body shape the server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Create,
    Update,
    Search,
}

/// Caller-supplied fields plus the fields to return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub return_fields: Vec<String>,
}

impl EntityPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn returning<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_fields.extend(names.into_iter().map(Into::into));
        self
    }
}

/// A validated body, ready to be serialized onto the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(rename = "createFields", default, skip_serializing_if = "Option::is_none")]
    pub create_fields: Option<Map<String, Value>>,
    #[serde(rename = "searchFields", default, skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<Map<String, Value>>,
    #[serde(rename = "returnFields", default, skip_serializing_if = "Vec::is_empty")]
    pub return_fields: Vec<String>,
}

impl RequestBody {
    /// The field map, whichever key it travels under.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.create_fields.as_ref().or(self.search_fields.as_ref())
    }

    pub(crate) fn create_fields_mut(&mut self) -> &mut Map<String, Value> {
        self.create_fields.get_or_insert_with(Map::new)
    }
}

/// Validate `payload` against `schema` and produce the request body.
pub fn build_request(
    schema: &ModuleSchema,
    kind: RequestKind,
    payload: &EntityPayload,
    strict: bool,
) -> Result<RequestBody> {
    let module = schema.module();
    let mut checked = Map::new();

    for (name, value) in &payload.fields {
        if name == ENTITY_ID {
            checked.insert(ENTITY_ID.to_string(), value.clone());
            continue;
        }
        let Some(field) = schema.lookup(name) else {
            if strict {
                return Err(RadiusError::unknown_field(module, name));
            }
            warn!(module, field = %name, "dropping field not present in module schema");
            continue;
        };
        let value = check_value(module, name, field, value, kind)?;
        checked.insert(field.key.clone(), value);
    }

    let mut body = RequestBody {
        return_fields: payload.return_fields.clone(),
        ..RequestBody::default()
    };
    match kind {
        RequestKind::Create | RequestKind::Update => body.create_fields = Some(checked),
        RequestKind::Search => body.search_fields = Some(checked),
    }
    Ok(body)
}

fn check_value(
    module: &str,
    name: &str,
    field: &FieldDescriptor,
    value: &Value,
    kind: RequestKind,
) -> Result<Value> {
    let is_multi = matches!(field.data_type, FieldType::MultiSelect(_));
    if let Some(allowed) = field.data_type.possible_values() {
        let supplied: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for item in &supplied {
            let permitted = value_as_text(item).is_some_and(|text| allowed.contains(&text));
            if !permitted {
                return Err(RadiusError::invalid_value(
                    module,
                    name,
                    format!("field value(s) <{value}> not found in possible values for field <{name}>"),
                ));
            }
        }
    }
    if is_multi && !value.is_array() {
        return Ok(Value::Array(vec![value.clone()]));
    }

    if kind == RequestKind::Search && field.data_type == FieldType::Date {
        if let Value::String(text) = value {
            return us_date_to_iso(text)
                .map(Value::String)
                .ok_or_else(|| {
                    RadiusError::invalid_value(
                        module,
                        name,
                        format!("date <{text}> is not in mm/dd/YYYY format"),
                    )
                });
        }
    }

    Ok(value.clone())
}

fn us_date_to_iso(text: &str) -> Option<String> {
    NaiveDate::parse_from_str(text.trim(), "%m/%d/%Y")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}
