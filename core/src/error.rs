//! Error types for the Radius web-services client.
//!
//! # Design
//! Every failure surfaces as a typed `RadiusError` variant; callers match on
//! the variant (or use the `is_*` helpers) instead of parsing messages.
//! Validation and not-found failures carry a kind tag so the caller can tell
//! an unknown field from a bad value, or a missing module from a missing
//! export filter.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, RadiusError>;

/// What a `RadiusError::NotFound` lookup was searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Module,
    ExportFilter,
    Entity,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Module => write!(f, "module"),
            NotFoundKind::ExportFilter => write!(f, "export filter"),
            NotFoundKind::Entity => write!(f, "entity"),
        }
    }
}

/// Why a field failed request validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// The field name resolves to nothing in the module schema (strict mode).
    UnknownField,
    /// The value is not permitted for the field.
    InvalidValue,
}

/// Errors returned by the client, transport and session layers.
#[derive(Debug, Error)]
pub enum RadiusError {
    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{kind} <{name}> not found")]
    NotFound { kind: NotFoundKind, name: String },

    #[error("invalid field <{field}> in module <{module}>: {message}")]
    Validation {
        kind: ValidationKind,
        module: String,
        field: String,
        message: String,
    },

    /// Non-2xx status, or a 2xx whose envelope status is not `ok`.
    #[error("HTTP response code: {status}; API response status: {api_status}; error message: {message}")]
    RemoteService {
        status: u16,
        api_status: String,
        message: String,
    },

    #[error("task timed out after {checks} checks ({waited:?}); status returned as {last_status}")]
    Timeout {
        checks: u32,
        waited: Duration,
        last_status: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RadiusError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RadiusError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RadiusError::Validation { .. })
    }

    /// Returns the validation kind if this is a validation failure.
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            RadiusError::Validation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn unknown_field(module: &str, field: &str) -> Self {
        RadiusError::Validation {
            kind: ValidationKind::UnknownField,
            module: module.to_string(),
            field: field.to_string(),
            message: format!("field name <{field}> not found in module <{module}>"),
        }
    }

    pub(crate) fn invalid_value(module: &str, field: &str, message: String) -> Self {
        RadiusError::Validation {
            kind: ValidationKind::InvalidValue,
            module: module.to_string(),
            field: field.to_string(),
            message,
        }
    }
}
