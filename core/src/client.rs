//! Stateless HTTP request builder and response parser for Radius web services.
//!
//! # Design
//! `RadiusClient` holds only the derived server URL and carries no mutable
//! state between calls. Each endpoint is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. `RadiusInstance` strings the two together over a
//! `Transport`; tests can drive either half on its own.
//!
//! Every response shares one envelope, `{status, payload, message}`. Export
//! filter endpoints report failures in `payload["Error Message"]` instead of
//! `message`.

use std::fmt::Display;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{RadiusError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::request::RequestBody;
use crate::types::{DeleteOutcome, Entity, EntityPage, ExportTask, ModuleInfo, TaskStatus};

/// Module that owns export filters and their execution tasks.
pub const EXPORT_FILTERS: &str = "ExportFilters";

const MODULES_PATH: &str = "/crm/webservice/modules";

/// Page cursor for multi-page search and task results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub query_id: String,
}

/// Synchronous, stateless client for the Radius web-services API.
#[derive(Debug, Clone)]
pub struct RadiusClient {
    server_url: String,
}

impl RadiusClient {
    /// Derive the web-services root from any URL on the tenant's host.
    ///
    /// Only scheme, host and port are kept; a URL without a scheme is taken
    /// as HTTPS.
    pub fn new(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("https".to_string(), trimmed),
        };
        if scheme != "http" && scheme != "https" {
            return Err(RadiusError::Config(format!(
                "unsupported URL scheme <{scheme}> in {base_url}"
            )));
        }
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host = authority.rsplit('@').next().unwrap_or_default();
        if host.is_empty() {
            return Err(RadiusError::Config(format!("no host in base URL <{base_url}>")));
        }
        Ok(Self {
            server_url: format!("{scheme}://{host}{MODULES_PATH}"),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> String {
        let mut url = self.server_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        if !query.is_empty() {
            let pairs: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
        url
    }

    fn get(&self, path: String) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path,
            headers: Vec::new(),
            body: None,
        }
    }

    fn with_json(&self, method: HttpMethod, path: String, body: Option<&RequestBody>) -> Result<HttpRequest> {
        let body = body
            .map(|b| serde_json::to_string(b).map_err(|e| RadiusError::Serialization(e.to_string())))
            .transpose()?;
        let headers = match body {
            Some(_) => vec![("content-type".to_string(), "application/json".to_string())],
            None => Vec::new(),
        };
        Ok(HttpRequest {
            method,
            path,
            headers,
            body,
        })
    }

    fn page_query(page: Option<&PageCursor>) -> Vec<(&'static str, String)> {
        match page {
            Some(cursor) => vec![
                ("page", cursor.page.to_string()),
                ("queryId", cursor.query_id.clone()),
            ],
            None => Vec::new(),
        }
    }

    pub fn build_list_modules(&self) -> HttpRequest {
        self.get(self.url(&[], &[("useSystemAndDisplayLabels", "true".to_string())]))
    }

    pub fn build_get_metadata(&self, module: &str) -> HttpRequest {
        self.get(self.url(&[module], &[]))
    }

    pub fn build_get_fields(&self, module: &str, details: bool) -> HttpRequest {
        let query = if details {
            vec![("includeDetails", "true".to_string())]
        } else {
            Vec::new()
        };
        self.get(self.url(&[module, "fields"], &query))
    }

    pub fn build_get_entity(&self, module: &str, id: impl Display, return_fields: &[&str]) -> HttpRequest {
        let id = id.to_string();
        let query = if return_fields.is_empty() {
            Vec::new()
        } else {
            vec![("returnFields", return_fields.join(","))]
        };
        self.get(self.url(&[module, &id], &query))
    }

    pub fn build_create_entity(&self, module: &str, body: &RequestBody) -> Result<HttpRequest> {
        self.with_json(HttpMethod::Post, self.url(&[module], &[]), Some(body))
    }

    pub fn build_update_entity(&self, module: &str, id: impl Display, body: &RequestBody) -> Result<HttpRequest> {
        let id = id.to_string();
        self.with_json(HttpMethod::Put, self.url(&[module, &id], &[]), Some(body))
    }

    pub fn build_delete_entity(&self, module: &str, id: impl Display) -> HttpRequest {
        let id = id.to_string();
        HttpRequest {
            method: HttpMethod::Delete,
            path: self.url(&[module, &id], &[]),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn build_search(&self, module: &str, body: &RequestBody, page: Option<&PageCursor>) -> Result<HttpRequest> {
        let path = self.url(&[module, "search"], &Self::page_query(page));
        self.with_json(HttpMethod::Post, path, Some(body))
    }

    pub fn build_create_export_task(&self, filter_id: impl Display) -> HttpRequest {
        let id = filter_id.to_string();
        HttpRequest {
            method: HttpMethod::Post,
            path: self.url(&[EXPORT_FILTERS, "createExecutionTask", &id], &[]),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn build_get_export_task(&self, task: &ExportTask) -> HttpRequest {
        self.get(self.url(&[EXPORT_FILTERS, "getExecutionTask", &task.id], &[]))
    }

    pub fn build_get_export_task_result(&self, task: &ExportTask, page: Option<&PageCursor>) -> HttpRequest {
        self.get(self.url(
            &[EXPORT_FILTERS, "getExecutionTaskResult", &task.id],
            &Self::page_query(page),
        ))
    }

    /// Unwrap the envelope and return the raw `payload`.
    pub fn parse_payload(&self, response: HttpResponse, module: Option<&str>) -> Result<Value> {
        let envelope = check_envelope(&response, module)?;
        envelope.payload.ok_or_else(|| {
            RadiusError::Deserialization(format!(
                "JSON returned with status {}, but does not contain expected payload",
                response.status
            ))
        })
    }

    fn parse_as<T: DeserializeOwned>(&self, response: HttpResponse, module: Option<&str>) -> Result<T> {
        let payload = self.parse_payload(response, module)?;
        serde_json::from_value(payload).map_err(|e| RadiusError::Deserialization(e.to_string()))
    }

    pub fn parse_modules(&self, response: HttpResponse) -> Result<Vec<ModuleInfo>> {
        self.parse_as(response, None)
    }

    /// Parse a single-entity payload (`{"entity": {...}}`).
    pub fn parse_entity(&self, response: HttpResponse, module: &str) -> Result<Entity> {
        let mut payload = self.parse_payload(response, Some(module))?;
        match payload.get_mut("entity").map(Value::take) {
            Some(Value::Object(entity)) => Ok(entity),
            Some(other) => Err(RadiusError::Deserialization(format!(
                "entity is not a JSON object: {other}"
            ))),
            None => Err(RadiusError::Deserialization(
                "payload does not contain an entity".to_string(),
            )),
        }
    }

    pub fn parse_entity_page(&self, response: HttpResponse, module: &str) -> Result<EntityPage> {
        self.parse_as(response, Some(module))
    }

    pub fn parse_export_task(&self, response: HttpResponse) -> Result<ExportTask> {
        self.parse_as(response, Some(EXPORT_FILTERS))
    }

    pub fn parse_task_status(&self, response: HttpResponse) -> Result<TaskStatus> {
        self.parse_as(response, Some(EXPORT_FILTERS))
    }

    pub fn parse_delete(&self, response: HttpResponse, module: &str) -> Result<DeleteOutcome> {
        let envelope = check_envelope(&response, Some(module))?;
        Ok(DeleteOutcome {
            status: envelope.status.unwrap_or_else(|| "ok".to_string()),
            message: envelope.message.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: Option<String>,
    payload: Option<Value>,
    message: Option<String>,
}

/// Map the response to an envelope, or to the matching `RadiusError`.
fn check_envelope(response: &HttpResponse, module: Option<&str>) -> Result<Envelope> {
    if response.status == 401 {
        return Err(RadiusError::Authentication(format!(
            "server returned 401: {}",
            response.body.trim()
        )));
    }

    let envelope: Envelope = match serde_json::from_str(&response.body) {
        Ok(envelope) => envelope,
        Err(e) if response.is_success() => {
            return Err(RadiusError::Deserialization(format!(
                "response OK, but no JSON envelope returned: {e}"
            )))
        }
        Err(_) => {
            return Err(RadiusError::RemoteService {
                status: response.status,
                api_status: String::new(),
                message: response.body.trim().to_string(),
            })
        }
    };

    let api_ok = envelope
        .status
        .as_deref()
        .map_or(true, |s| s.eq_ignore_ascii_case("ok"));
    if response.is_success() && api_ok {
        return Ok(envelope);
    }

    let export_message = envelope
        .payload
        .as_ref()
        .and_then(|p| p.get("Error Message"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = if module == Some(EXPORT_FILTERS) {
        export_message.or(envelope.message)
    } else {
        envelope.message.or(export_message)
    };
    Err(RadiusError::RemoteService {
        status: response.status,
        api_status: envelope.status.unwrap_or_default(),
        message: message.unwrap_or_default(),
    })
}
