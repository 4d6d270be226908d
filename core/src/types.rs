//! Domain DTOs for the Radius web-services API.
//!
//! The vendor names its JSON keys with spaces and mixed case; serde renames
//! map them onto Rust fields. Entity IDs arrive as numbers or strings
//! depending on the endpoint, so they are normalized to `String`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single record, keyed by field name (or field ID).
pub type Entity = Map<String, Value>;

/// One module visible to the authenticated tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    #[serde(rename = "module name")]
    pub name: String,
    #[serde(rename = "module display name", default)]
    pub display_name: String,
}

/// A saved export query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFilter {
    #[serde(rename = "Entity ID", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "Filter Name", default)]
    pub name: String,
    #[serde(rename = "Description", default, deserialize_with = "nullable_string")]
    pub description: String,
    #[serde(rename = "Primary Module", default, deserialize_with = "nullable_string")]
    pub primary_module: String,
}

/// Handle for an export-filter execution task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportTask {
    #[serde(rename = "Execution Task ID", deserialize_with = "string_or_number")]
    pub id: String,
}

impl ExportTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Status reported by `getExecutionTask`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskStatus {
    #[serde(rename = "Execution Task Status")]
    pub status: String,
    #[serde(rename = "Total Records", default)]
    pub total_records: u64,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        self.status.eq_ignore_ascii_case("finished")
    }

    /// Statuses after which the task will never finish.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "failed" | "error" | "cancelled" | "canceled"
        )
    }
}

/// One page of entities from a search or a task result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntityPage {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(rename = "total pages", default)]
    pub total_pages: u32,
    #[serde(rename = "queryId", default, deserialize_with = "optional_string_or_number")]
    pub query_id: Option<String>,
}

/// Server acknowledgement of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl DeleteOutcome {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
