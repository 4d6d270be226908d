//! Authenticated session against one Radius tenant.
//!
//! # Design
//! `RadiusInstance` pairs the stateless `RadiusClient` with a `Transport` and
//! two pieces of session state: the module list fetched at connect time, and
//! a cache of module schemas filled on first use. Schemas are immutable once
//! cached; `invalidate_schema` and `clear_schema_cache` let the caller pick
//! up vendor-side changes. Every public method is one blocking call, except
//! search and task results (which follow pagination) and export-task polling.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde_json::Value;
use tracing::{debug, info};

use crate::auth::Credentials;
use crate::client::{PageCursor, RadiusClient, EXPORT_FILTERS};
use crate::config::{ClientConfig, PollPolicy};
use crate::error::{NotFoundKind, RadiusError, Result};
use crate::export;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::request::{build_request, EntityPayload, RequestBody, RequestKind};
use crate::schema::{field_names, value_as_text, FieldDescriptor, ModuleSchema, ENTITY_ID};
use crate::transport::DigestTransport;
use crate::types::{DeleteOutcome, Entity, EntityPage, ExportFilter, ExportTask, ModuleInfo};

/// Updates to this module must always carry these two fields.
const REGISTRATIONS: &str = "Registrations";
const REGISTRATION_KEYS: [&str; 2] = ["Participant", "Iteration Name"];

/// Result of `get_all_fields`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldList {
    Names(Vec<String>),
    Details(Vec<FieldDescriptor>),
}

pub struct RadiusInstance<T = DigestTransport> {
    client: RadiusClient,
    transport: T,
    base_url: String,
    username: String,
    poll: PollPolicy,
    all_modules: Vec<ModuleInfo>,
    schemas: Mutex<HashMap<String, Arc<ModuleSchema>>>,
}

impl RadiusInstance<DigestTransport> {
    /// Connect with username, password and any URL on the tenant's host.
    pub fn new(username: &str, password: &str, base_url: &str) -> Result<Self> {
        Self::connect(ClientConfig::new(base_url, Credentials::new(username, password)))
    }

    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = DigestTransport::new(config.credentials.clone(), config.timeout);
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> RadiusInstance<T> {
    /// Connect over a caller-supplied transport; fetches the module list.
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        let client = RadiusClient::new(&config.base_url)?;
        let response = transport.execute(&client.build_list_modules())?;
        let all_modules = client.parse_modules(response)?;
        info!(
            server = client.server_url(),
            user = %config.credentials.username,
            modules = all_modules.len(),
            "connected to Radius web services"
        );
        Ok(Self {
            client,
            transport,
            base_url: config.base_url,
            username: config.credentials.username,
            poll: config.poll,
            all_modules,
            schemas: Mutex::new(HashMap::new()),
        })
    }

    fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.execute(&request)
    }

    pub fn client(&self) -> &RadiusClient {
        &self.client
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn all_modules(&self) -> &[ModuleInfo] {
        &self.all_modules
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub fn set_poll_policy(&mut self, poll: PollPolicy) {
        self.poll = poll;
    }

    /// Official name for a module given its name or display name.
    pub fn module_name(&self, module: &str) -> Result<&str> {
        self.all_modules
            .iter()
            .find(|m| m.name == module || m.display_name == module)
            .map(|m| m.name.as_str())
            .ok_or_else(|| RadiusError::NotFound {
                kind: NotFoundKind::Module,
                name: module.to_string(),
            })
    }

    pub fn get_all_fields(&self, module: &str, details: bool) -> Result<FieldList> {
        let name = self.module_name(module)?;
        if details {
            return Ok(FieldList::Details(self.schema(name)?.fields().to_vec()));
        }
        let response = self.call(self.client.build_get_fields(name, false))?;
        let payload = self.client.parse_payload(response, Some(name))?;
        Ok(FieldList::Names(field_names(&payload)?))
    }

    /// Raw module metadata, passed through untouched.
    pub fn get_metadata(&self, module: &str) -> Result<Value> {
        let name = self.module_name(module)?;
        let response = self.call(self.client.build_get_metadata(name))?;
        self.client.parse_payload(response, Some(name))
    }

    /// The module's field schema, fetched on first use and cached.
    pub fn schema(&self, module: &str) -> Result<Arc<ModuleSchema>> {
        let name = self.module_name(module)?;
        if let Some(schema) = self.cached_schema(name) {
            return Ok(schema);
        }

        debug!(module = name, "fetching field schema");
        let response = self.call(self.client.build_get_fields(name, true))?;
        let payload = self.client.parse_payload(response, Some(name))?;
        let schema = Arc::new(ModuleSchema::from_payload(name, &payload)?);
        self.schema_cache().insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    // Entries are whole `Arc`s, so a panic while the lock was held cannot
    // leave the map half-updated.
    fn schema_cache(&self) -> MutexGuard<'_, HashMap<String, Arc<ModuleSchema>>> {
        self.schemas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_schema(&self, name: &str) -> Option<Arc<ModuleSchema>> {
        self.schema_cache().get(name).cloned()
    }

    pub fn invalidate_schema(&self, module: &str) {
        let name = self.module_name(module).unwrap_or(module);
        self.schema_cache().remove(name);
    }

    pub fn clear_schema_cache(&self) {
        self.schema_cache().clear();
    }

    /// Validate `payload` against the module schema and build the body.
    pub fn create_request_object(
        &self,
        module: &str,
        payload: &EntityPayload,
        kind: RequestKind,
        strict: bool,
    ) -> Result<RequestBody> {
        let schema = self.schema(module)?;
        build_request(&schema, kind, payload, strict)
    }

    /// Fetch one entity; an empty `return_fields` returns every field.
    pub fn get_entity(&self, module: &str, id: impl fmt::Display, return_fields: &[&str]) -> Result<Entity> {
        let name = self.module_name(module)?;
        let response = self.call(self.client.build_get_entity(name, id, return_fields))?;
        self.client.parse_entity(response, name)
    }

    /// Create an entity; returns its `Entity ID` or the requested fields.
    pub fn create_entity(&self, module: &str, payload: &EntityPayload, strict: bool) -> Result<Entity> {
        let body = self.create_request_object(module, payload, RequestKind::Create, strict)?;
        self.create_entity_from_body(module, &body)
    }

    /// Create from an already-built body.
    pub fn create_entity_from_body(&self, module: &str, body: &RequestBody) -> Result<Entity> {
        let name = self.module_name(module)?;
        let response = self.call(self.client.build_create_entity(name, body)?)?;
        self.client.parse_entity(response, name)
    }

    pub fn update_entity(
        &self,
        module: &str,
        id: impl fmt::Display,
        payload: &EntityPayload,
        strict: bool,
    ) -> Result<Entity> {
        let body = self.create_request_object(module, payload, RequestKind::Update, strict)?;
        self.update_entity_from_body(module, id, body)
    }

    /// Update from an already-built body.
    ///
    /// Registrations updates are completed with `Participant` and
    /// `Iteration Name` from the stored entity when the body lacks them.
    pub fn update_entity_from_body(&self, module: &str, id: impl fmt::Display, mut body: RequestBody) -> Result<Entity> {
        let name = self.module_name(module)?;
        let id = id.to_string();

        if name == REGISTRATIONS {
            let fields = body.create_fields_mut();
            let missing = REGISTRATION_KEYS.iter().any(|key| !fields.contains_key(*key));
            if missing {
                debug!(id = %id, "completing registration update from stored entity");
                let registration = self.get_entity(REGISTRATIONS, &id, &REGISTRATION_KEYS)?;
                let fields = body.create_fields_mut();
                for key in REGISTRATION_KEYS {
                    let value = registration.get(key).cloned().unwrap_or(Value::Null);
                    fields.insert(key.to_string(), value);
                }
            }
        }

        let response = self.call(self.client.build_update_entity(name, &id, &body)?)?;
        self.client.parse_entity(response, name)
    }

    pub fn delete_entity(&self, module: &str, id: impl fmt::Display) -> Result<DeleteOutcome> {
        let name = self.module_name(module)?;
        let response = self.call(self.client.build_delete_entity(name, id))?;
        self.client.parse_delete(response, name)
    }

    /// Run a search and collect the entities of every result page.
    pub fn search_for_entities(&self, module: &str, body: &RequestBody) -> Result<Vec<Entity>> {
        let name = self.module_name(module)?;
        let response = self.call(self.client.build_search(name, body, None)?)?;
        let first = self.client.parse_entity_page(response, name)?;
        self.collect_pages(first, |cursor| {
            let response = self.call(self.client.build_search(name, body, Some(cursor))?)?;
            self.client.parse_entity_page(response, name)
        })
    }

    fn collect_pages<F>(&self, first: EntityPage, mut fetch: F) -> Result<Vec<Entity>>
    where
        F: FnMut(&PageCursor) -> Result<EntityPage>,
    {
        let mut entities = first.entities;
        if first.total_pages <= 1 {
            return Ok(entities);
        }
        let query_id = first.query_id.ok_or_else(|| {
            RadiusError::Deserialization("multi-page result without a queryId".to_string())
        })?;
        for page in 2..=first.total_pages {
            debug!(page, total = first.total_pages, "fetching result page");
            let cursor = PageCursor {
                page,
                query_id: query_id.clone(),
            };
            entities.extend(fetch(&cursor)?.entities);
        }
        Ok(entities)
    }

    pub fn get_active_export_filters(&self) -> Result<Vec<ExportFilter>> {
        let payload = EntityPayload::new()
            .field("Status", "Active")
            .returning(["Filter Name", "Description", "Primary Module", ENTITY_ID]);
        let body = self.create_request_object(EXPORT_FILTERS, &payload, RequestKind::Search, false)?;
        self.search_for_entities(EXPORT_FILTERS, &body)?
            .into_iter()
            .map(|entity| {
                serde_json::from_value(Value::Object(entity))
                    .map_err(|e| RadiusError::Deserialization(format!("export filter: {e}")))
            })
            .collect()
    }

    pub fn get_export_filter_id_by_name(&self, name: &str) -> Result<String> {
        let payload = EntityPayload::new()
            .field("Filter Name", name)
            .returning([ENTITY_ID]);
        let body = self.create_request_object(EXPORT_FILTERS, &payload, RequestKind::Search, false)?;
        let matches = self.search_for_entities(EXPORT_FILTERS, &body)?;
        matches
            .first()
            .and_then(|entity| entity.get(ENTITY_ID))
            .and_then(value_as_text)
            .ok_or_else(|| RadiusError::NotFound {
                kind: NotFoundKind::ExportFilter,
                name: name.to_string(),
            })
    }

    pub fn export_filter_create_task(&self, filter_id: impl fmt::Display) -> Result<ExportTask> {
        let filter_id = filter_id.to_string();
        let response = self.call(self.client.build_create_export_task(&filter_id))?;
        let task = self.client.parse_export_task(response)?;
        info!(filter = %filter_id, task = %task.id, "created export task");
        Ok(task)
    }

    /// Wait for `task` under the session's poll policy and return its rows.
    pub fn get_export_filter_as_list(&self, task: &ExportTask) -> Result<Vec<Entity>> {
        self.get_export_filter_as_list_with(task, self.poll)
    }

    pub fn get_export_filter_as_list_with(&self, task: &ExportTask, poll: PollPolicy) -> Result<Vec<Entity>> {
        let mut status = self
            .client
            .parse_task_status(self.call(self.client.build_get_export_task(task))?)?;
        let mut checks = 0;
        while !status.is_finished() {
            if status.is_failed() {
                return Err(RadiusError::RemoteService {
                    status: 200,
                    api_status: status.status,
                    message: format!("export task {} did not finish", task.id),
                });
            }
            if checks == poll.max_checks {
                return Err(RadiusError::Timeout {
                    checks,
                    waited: poll.interval * checks,
                    last_status: status.status,
                });
            }
            thread::sleep(poll.interval);
            checks += 1;
            status = self
                .client
                .parse_task_status(self.call(self.client.build_get_export_task(task))?)?;
            debug!(task = %task.id, status = %status.status, check = checks, "polled export task");
        }

        if status.total_records == 0 {
            return Ok(Vec::new());
        }
        let response = self.call(self.client.build_get_export_task_result(task, None))?;
        let first = self.client.parse_entity_page(response, EXPORT_FILTERS)?;
        self.collect_pages(first, |cursor| {
            let response = self.call(self.client.build_get_export_task_result(task, Some(cursor)))?;
            self.client.parse_entity_page(response, EXPORT_FILTERS)
        })
    }

    /// Write the task's rows to `path` as CSV; returns the row count.
    pub fn get_export_filter_as_file(&self, task: &ExportTask, path: impl AsRef<Path>) -> Result<usize> {
        let rows = self.get_export_filter_as_list(task)?;
        export::write_csv_file(&rows, path.as_ref())?;
        info!(task = %task.id, rows = rows.len(), path = %path.as_ref().display(), "wrote export CSV");
        Ok(rows.len())
    }

    /// Look up a filter by name, run it, and return its rows.
    pub fn get_export_filter_by_name_as_list(&self, name: &str, poll: Option<PollPolicy>) -> Result<Vec<Entity>> {
        let filter_id = self.get_export_filter_id_by_name(name)?;
        let task = self.export_filter_create_task(&filter_id)?;
        self.get_export_filter_as_list_with(&task, poll.unwrap_or(self.poll))
    }
}

impl<T> fmt::Display for RadiusInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Instance of Radius Web Service on {}, as user: {}>",
            self.base_url, self.username
        )
    }
}

impl<T> fmt::Debug for RadiusInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadiusInstance")
            .field("server_url", &self.client.server_url())
            .field("username", &self.username)
            .field("modules", &self.all_modules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::panic::{self, AssertUnwindSafe};

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Canned(RefCell<VecDeque<Value>>);

    impl Transport for Canned {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            let payload = self
                .0
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| RadiusError::Transport(format!("unexpected request to {}", request.path)))?;
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: json!({"status": "ok", "payload": payload}).to_string(),
            })
        }
    }

    fn contacts_fields() -> Value {
        json!({"FirstName": {"Display Label": "First Name", "Data Type": "Text"}})
    }

    fn instance(replies: Vec<Value>) -> RadiusInstance<Canned> {
        let mut queue = VecDeque::from(replies);
        queue.push_front(json!([{"module name": "Contacts", "module display name": "People"}]));
        let config = ClientConfig::new("https://crm.example.edu", Credentials::new("svc", "pw"));
        RadiusInstance::with_transport(config, Canned(RefCell::new(queue))).unwrap()
    }

    fn poison(instance: &RadiusInstance<Canned>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = instance.schemas.lock().unwrap();
            panic!("panic while holding the schema cache");
        }));
        assert!(result.is_err());
        assert!(instance.schemas.is_poisoned());
    }

    #[test]
    fn schema_is_fetched_once_per_module() {
        let instance = instance(vec![contacts_fields()]);
        let first = instance.schema("Contacts").unwrap();
        let second = instance.schema("People").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn poisoned_cache_keeps_serving_entries() {
        let instance = instance(vec![contacts_fields()]);
        let cached = instance.schema("Contacts").unwrap();
        poison(&instance);

        // Served from the cache; the transport has nothing left to answer.
        let again = instance.schema("Contacts").unwrap();
        assert!(Arc::ptr_eq(&cached, &again));
    }

    #[test]
    fn poisoned_cache_still_invalidates_and_refills() {
        let instance = instance(vec![contacts_fields(), contacts_fields()]);
        let stale = instance.schema("Contacts").unwrap();
        poison(&instance);

        instance.invalidate_schema("Contacts");
        let fresh = instance.schema("Contacts").unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));

        instance.clear_schema_cache();
        assert!(instance.cached_schema("Contacts").is_none());
    }
}
