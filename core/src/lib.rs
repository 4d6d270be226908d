//! Synchronous client for the Radius CRM web-services API.
//!
//! # Overview
//! `RadiusInstance` is an authenticated session: it discovers the tenant's
//! modules, validates entity payloads against each module's field schema,
//! performs CRUD and searches, and drives export-filter tasks to completion.
//!
//! # Design
//! - `RadiusClient` is stateless: `build_*` produces an `HttpRequest`,
//!   `parse_*` consumes an `HttpResponse`. No I/O happens there.
//! - `Transport` is the I/O seam. `DigestTransport` (ureq + HTTP Digest) is
//!   the production implementation; tests substitute scripted transports.
//! - `request::build_request` is the only place field validation happens,
//!   and it works on an already-fetched `ModuleSchema`.
//! - Every failure is a typed `RadiusError`.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod http;
pub mod request;
pub mod schema;
pub mod session;
pub mod transport;
pub mod types;

pub use auth::Credentials;
pub use client::{PageCursor, RadiusClient, EXPORT_FILTERS};
pub use config::{ClientConfig, PollPolicy};
pub use error::{NotFoundKind, RadiusError, Result, ValidationKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use request::{build_request, EntityPayload, RequestBody, RequestKind};
pub use schema::{FieldDescriptor, FieldType, ModuleSchema, ENTITY_ID};
pub use session::{FieldList, RadiusInstance};
pub use transport::DigestTransport;
pub use types::{DeleteOutcome, Entity, EntityPage, ExportFilter, ExportTask, ModuleInfo, TaskStatus};
