//! In-memory stand-in for the Radius CRM web services.
//!
//! Serves the same envelope (`{status, payload, message}`) and paths as the
//! vendor under `/crm/webservice/modules`, guarded by HTTP Digest auth.
//! Export filters run instantly but report `Running` for a configurable
//! number of polls, and every list result is paginated by `page_size`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MODULES_ROOT: &str = "/crm/webservice/modules";
const EXPORT_FILTERS: &str = "ExportFilters";
const ENTITY_ID: &str = "Entity ID";

pub type Entity = Map<String, Value>;
pub type Db = Arc<RwLock<MockState>>;
type ApiResponse = (StatusCode, Json<Value>);

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub username: String,
    pub password: String,
    pub realm: String,
    /// Entities per result page for searches and task results.
    pub page_size: usize,
    /// `getExecutionTask` calls answered with `Running` before `Finished`.
    pub task_polls: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            username: "webservice".to_string(),
            password: "s3cret".to_string(),
            realm: "Radius Web Services".to_string(),
            page_size: 2,
            task_polls: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleDef {
    pub name: String,
    pub display_name: String,
    /// Detailed field payload, keyed by field key.
    pub fields: Map<String, Value>,
}

/// Query string accepted by the entity, search and task endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<usize>,
    query_id: Option<String>,
    #[serde(default)]
    include_details: bool,
    return_fields: Option<String>,
}

#[derive(Debug, Clone)]
struct ExportRun {
    rows: Vec<Entity>,
    polls_remaining: u32,
}

#[derive(Debug)]
pub struct MockState {
    pub config: MockConfig,
    nonce: String,
    opaque: String,
    modules: Vec<ModuleDef>,
    entities: HashMap<String, BTreeMap<u64, Entity>>,
    filter_criteria: HashMap<u64, Entity>,
    searches: HashMap<String, Vec<Entity>>,
    tasks: HashMap<String, ExportRun>,
    next_id: u64,
}

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            nonce: Uuid::new_v4().simple().to_string(),
            opaque: Uuid::new_v4().simple().to_string(),
            modules: Vec::new(),
            entities: HashMap::new(),
            filter_criteria: HashMap::new(),
            searches: HashMap::new(),
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Contacts, Registrations and a handful of export filters.
    pub fn seeded(config: MockConfig) -> Self {
        let mut state = Self::new(config);
        state.add_module(
            "Contacts",
            "People",
            json!({
                "First Name": {"Display Label": "First Name", "Data Type": "Text", "Required": true},
                "Last Name": {"Display Label": "Last Name", "Data Type": "Text", "Required": true},
                "Email Address": {"Display Label": "Email", "Data Type": "Text"},
                "Status": {"Display Label": "Status", "Data Type": "Picklist", "Possible Values": ["Active", "Inactive"]},
                "Interests": {"Display Label": "Interests", "Data Type": "Multi-Select", "Possible Values": ["Art", "Music", "Sports"]},
                "Birth Date": {"Display Label": "Birth Date", "Data Type": "Date"}
            }),
        );
        state.add_module(
            "Registrations",
            "Registrations",
            json!({
                "Participant": {"Display Label": "Participant", "Data Type": "Number", "Required": true},
                "Iteration Name": {"Display Label": "Iteration Name", "Data Type": "Text", "Required": true},
                "Status": {"Display Label": "Status", "Data Type": "Picklist", "Possible Values": ["Registered", "Withdrawn", "Attended"]}
            }),
        );
        state.add_module(
            EXPORT_FILTERS,
            "Export Filters",
            json!({
                "Filter Name": {"Display Label": "Filter Name", "Data Type": "Text"},
                "Description": {"Display Label": "Description", "Data Type": "Text"},
                "Primary Module": {"Display Label": "Primary Module", "Data Type": "Text"},
                "Status": {"Display Label": "Status", "Data Type": "Picklist", "Possible Values": ["Active", "Inactive"]}
            }),
        );

        for (first, last, status) in [
            ("Jane", "Doe", "Active"),
            ("John", "Roe", "Inactive"),
            ("Ada", "Lovelace", "Active"),
        ] {
            state.insert_entity(
                "Contacts",
                entity(json!({"First Name": first, "Last Name": last, "Status": status})),
            );
        }
        let registration = state.insert_entity(
            "Registrations",
            entity(json!({"Participant": 0, "Iteration Name": "Fall 2018", "Status": "Registered"})),
        );
        let first_contact = state.entities["Contacts"].keys().next().copied().unwrap_or_default();
        if let Some(reg) = state
            .entities
            .get_mut("Registrations")
            .and_then(|m| m.get_mut(&registration))
        {
            reg.insert("Participant".to_string(), json!(first_contact));
        }

        state.add_export_filter("Active Contacts", "Contacts", "Active", json!({"Status": "Active"}));
        state.add_export_filter("All Registrations", "Registrations", "Active", json!({}));
        state.add_export_filter("Retired Export", "Contacts", "Inactive", json!({}));
        state.add_export_filter("Nobody", "Contacts", "Active", json!({"Status": "Archived"}));
        state
    }

    pub fn add_module(&mut self, name: &str, display_name: &str, fields: Value) {
        self.modules.push(ModuleDef {
            name: name.to_string(),
            display_name: display_name.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        });
        self.entities.entry(name.to_string()).or_default();
    }

    /// Store an entity and return its new `Entity ID`.
    pub fn insert_entity(&mut self, module: &str, mut fields: Entity) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        fields.insert(ENTITY_ID.to_string(), json!(id));
        self.entities.entry(module.to_string()).or_default().insert(id, fields);
        id
    }

    pub fn add_export_filter(&mut self, name: &str, primary_module: &str, status: &str, criteria: Value) -> u64 {
        let id = self.insert_entity(
            EXPORT_FILTERS,
            entity(json!({
                "Filter Name": name,
                "Description": format!("{name} export"),
                "Primary Module": primary_module,
                "Status": status
            })),
        );
        self.filter_criteria
            .insert(id, criteria.as_object().cloned().unwrap_or_default());
        id
    }

    pub fn entities(&self, module: &str) -> Vec<Entity> {
        self.entities
            .get(module)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// A valid `Authorization` header for `method` and `uri`, for tests that
    /// call the router directly.
    pub fn authorization(&self, method: &str, uri: &str) -> String {
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            self.config.username, self.config.realm, self.config.password
        ));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce));
        format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
            self.config.username, self.config.realm, self.nonce
        )
    }

    fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.iter().find(|m| m.name == name)
    }

    fn challenge(&self) -> String {
        format!(
            "Digest realm=\"{}\", qop=\"auth\", nonce=\"{}\", opaque=\"{}\", algorithm=MD5",
            self.config.realm, self.nonce, self.opaque
        )
    }

    /// Check a `Digest` authorization for `method` on the request target
    /// `uri` (path plus query).
    fn verify(&self, method: &str, uri: &str, authorization: &str) -> bool {
        let Some(rest) = authorization.strip_prefix("Digest ") else {
            return false;
        };
        let params = parse_params(rest);
        let param = |k: &str| params.get(k).map(String::as_str).unwrap_or_default();

        if param("username") != self.config.username
            || param("realm") != self.config.realm
            || param("nonce") != self.nonce
            || param("uri") != uri
        {
            return false;
        }
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            self.config.username, self.config.realm, self.config.password
        ));
        let ha2 = md5_hex(&format!("{method}:{}", param("uri")));
        let expected = if param("qop").is_empty() {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        } else {
            md5_hex(&format!(
                "{ha1}:{}:{}:{}:{}:{ha2}",
                self.nonce,
                param("nc"),
                param("cnonce"),
                param("qop")
            ))
        };
        expected == param("response")
    }
}

fn entity(value: Value) -> Entity {
    value.as_object().cloned().unwrap_or_default()
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, remainder)) => (value.to_string(), remainder),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.split_once(',') {
                Some((value, remainder)) => (value.trim().to_string(), remainder),
                None => (after.trim().to_string(), ""),
            }
        };
        params.insert(key, value);
        rest = remainder.trim_start_matches([',', ' ']);
    }
    params
}

pub fn app(state: MockState) -> Router {
    let db: Db = Arc::new(RwLock::new(state));
    Router::new()
        .route(MODULES_ROOT, get(list_modules))
        .route(
            &format!("{MODULES_ROOT}/{{module}}"),
            get(get_metadata).post(create_entity),
        )
        .route(
            &format!("{MODULES_ROOT}/{{module}}/{{segment}}"),
            get(get_fields_or_entity)
                .post(search)
                .put(update_entity)
                .delete(delete_entity),
        )
        .route(
            &format!("{MODULES_ROOT}/{{module}}/{{action}}/{{id}}"),
            get(get_task).post(create_task),
        )
        .layer(middleware::from_fn_with_state(db.clone(), require_digest))
        .with_state(db)
}

pub async fn run(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn require_digest(State(db): State<Db>, request: Request, next: Next) -> Response {
    let authorized = {
        let state = db.read().await;
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                let uri = request.uri().path_and_query().map_or("/", |p| p.as_str());
                state.verify(request.method().as_str(), uri, v)
            })
    };
    if authorized {
        return next.run(request).await;
    }
    debug!(uri = %request.uri(), "rejecting request without valid digest credentials");
    let challenge = db.read().await.challenge();
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({"status": "error", "message": "Unauthorized"})),
    )
        .into_response()
}

fn ok(payload: Value) -> ApiResponse {
    (StatusCode::OK, Json(json!({"status": "ok", "payload": payload})))
}

fn error(status: StatusCode, module: &str, message: &str) -> ApiResponse {
    let body = if module == EXPORT_FILTERS {
        json!({"status": "error", "payload": {"Error Message": message}})
    } else {
        json!({"status": "error", "message": message})
    };
    (status, Json(body))
}

fn project(entity: &Entity, return_fields: &[String]) -> Entity {
    if return_fields.is_empty() {
        return entity.clone();
    }
    return_fields
        .iter()
        .filter_map(|f| entity.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn meets_criteria(entity: &Entity, criteria: &Entity) -> bool {
    criteria.iter().all(|(key, wanted)| match entity.get(key) {
        Some(Value::Array(items)) => items.iter().any(|item| text(item) == text(wanted)),
        Some(actual) => text(actual) == text(wanted),
        None => false,
    })
}

fn page_of(rows: &[Entity], page: usize, page_size: usize) -> Vec<Entity> {
    rows.iter()
        .skip((page.saturating_sub(1)) * page_size)
        .take(page_size)
        .cloned()
        .collect()
}

fn total_pages(rows: usize, page_size: usize) -> usize {
    rows.div_ceil(page_size.max(1))
}

/// Check every field in `fields` against the module definition.
fn unknown_field<'a>(module: &ModuleDef, fields: &'a Entity) -> Option<&'a str> {
    fields
        .keys()
        .find(|k| k.as_str() != ENTITY_ID && !module.fields.contains_key(k.as_str()))
        .map(String::as_str)
}

async fn list_modules(State(db): State<Db>) -> ApiResponse {
    let state = db.read().await;
    let modules: Vec<Value> = state
        .modules
        .iter()
        .map(|m| json!({"module name": m.name, "module display name": m.display_name}))
        .collect();
    ok(Value::Array(modules))
}

async fn get_metadata(State(db): State<Db>, Path(module): Path<String>) -> ApiResponse {
    let state = db.read().await;
    match state.module(&module) {
        Some(def) => ok(json!({
            "module name": def.name,
            "module display name": def.display_name,
            "field count": def.fields.len()
        })),
        None => error(StatusCode::NOT_FOUND, &module, "Module not found"),
    }
}

async fn create_entity(
    State(db): State<Db>,
    Path(module): Path<String>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let mut state = db.write().await;
    let Some(def) = state.module(&module).cloned() else {
        return error(StatusCode::NOT_FOUND, &module, "Module not found");
    };
    let fields = body.get("createFields").map(|v| entity(v.clone())).unwrap_or_default();
    if let Some(field) = unknown_field(&def, &fields) {
        return error(StatusCode::BAD_REQUEST, &module, &format!("Field {field} not found"));
    }
    let return_fields = string_list(body.get("returnFields"));
    let id = state.insert_entity(&module, fields);
    let stored = &state.entities[&module][&id];
    let returned = if return_fields.is_empty() {
        project(stored, &[ENTITY_ID.to_string()])
    } else {
        project(stored, &return_fields)
    };
    ok(json!({"entity": returned}))
}

async fn get_fields_or_entity(
    State(db): State<Db>,
    Path((module, segment)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> ApiResponse {
    let state = db.read().await;
    let Some(def) = state.module(&module) else {
        return error(StatusCode::NOT_FOUND, &module, "Module not found");
    };

    if segment == "fields" {
        return if params.include_details {
            ok(Value::Object(def.fields.clone()))
        } else {
            ok(Value::Array(def.fields.keys().map(|k| json!(k)).collect()))
        };
    }

    let Ok(id) = segment.parse::<u64>() else {
        return error(StatusCode::BAD_REQUEST, &module, "Entity ID must be numeric");
    };
    let Some(stored) = state.entities.get(&module).and_then(|m| m.get(&id)) else {
        return error(StatusCode::NOT_FOUND, &module, "Entity not found");
    };
    let return_fields: Vec<String> = params
        .return_fields
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    ok(json!({"entity": project(stored, &return_fields)}))
}

async fn update_entity(
    State(db): State<Db>,
    Path((module, segment)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let mut state = db.write().await;
    let Some(def) = state.module(&module).cloned() else {
        return error(StatusCode::NOT_FOUND, &module, "Module not found");
    };
    let Ok(id) = segment.parse::<u64>() else {
        return error(StatusCode::BAD_REQUEST, &module, "Entity ID must be numeric");
    };
    let fields = body.get("createFields").map(|v| entity(v.clone())).unwrap_or_default();
    if let Some(field) = unknown_field(&def, &fields) {
        return error(StatusCode::BAD_REQUEST, &module, &format!("Field {field} not found"));
    }
    if module == "Registrations"
        && !(fields.contains_key("Participant") && fields.contains_key("Iteration Name"))
    {
        warn!(id, "registration update without Participant and Iteration Name");
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &module,
            "java.lang.NullPointerException",
        );
    }
    let Some(stored) = state.entities.get_mut(&module).and_then(|m| m.get_mut(&id)) else {
        return error(StatusCode::NOT_FOUND, &module, "Entity not found");
    };
    for (k, v) in fields {
        stored.insert(k, v);
    }
    let return_fields = string_list(body.get("returnFields"));
    let returned = if return_fields.is_empty() {
        project(stored, &[ENTITY_ID.to_string()])
    } else {
        project(stored, &return_fields)
    };
    ok(json!({"entity": returned}))
}

async fn delete_entity(
    State(db): State<Db>,
    Path((module, segment)): Path<(String, String)>,
) -> ApiResponse {
    let mut state = db.write().await;
    let Ok(id) = segment.parse::<u64>() else {
        return error(StatusCode::BAD_REQUEST, &module, "Entity ID must be numeric");
    };
    match state.entities.get_mut(&module).and_then(|m| m.remove(&id)) {
        Some(_) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "message": format!("Entity {id} deleted.")})),
        ),
        None => error(StatusCode::NOT_FOUND, &module, "Entity not found"),
    }
}

async fn search(
    State(db): State<Db>,
    Path((module, segment)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    Json(body): Json<Value>,
) -> ApiResponse {
    if segment != "search" {
        return error(StatusCode::NOT_FOUND, &module, "Unknown action");
    }
    let mut state = db.write().await;
    let page_size = state.config.page_size;
    let Some(def) = state.module(&module).cloned() else {
        return error(StatusCode::NOT_FOUND, &module, "Module not found");
    };

    let (query_id, rows) = match (&params.query_id, params.page) {
        (Some(query_id), Some(_)) => match state.searches.get(query_id) {
            Some(rows) => (query_id.clone(), rows.clone()),
            None => return error(StatusCode::NOT_FOUND, &module, "Query expired"),
        },
        _ => {
            let criteria = body.get("searchFields").map(|v| entity(v.clone())).unwrap_or_default();
            if let Some(field) = unknown_field(&def, &criteria) {
                return error(StatusCode::BAD_REQUEST, &module, &format!("Field {field} not found"));
            }
            let return_fields = string_list(body.get("returnFields"));
            let rows: Vec<Entity> = state
                .entities(&module)
                .iter()
                .filter(|e| meets_criteria(e, &criteria))
                .map(|e| project(e, &return_fields))
                .collect();
            (Uuid::new_v4().to_string(), rows)
        }
    };

    let page = params.page.unwrap_or(1);
    let pages = total_pages(rows.len(), page_size);
    // A query is kept only until its last page has been served.
    if page >= pages {
        state.searches.remove(&query_id);
    } else {
        state.searches.entry(query_id.clone()).or_insert_with(|| rows.clone());
    }
    ok(json!({
        "entities": page_of(&rows, page, page_size),
        "total pages": pages,
        "total records": rows.len(),
        "queryId": query_id
    }))
}

async fn create_task(
    State(db): State<Db>,
    Path((module, action, id)): Path<(String, String, String)>,
) -> ApiResponse {
    if module != EXPORT_FILTERS || action != "createExecutionTask" {
        return error(StatusCode::NOT_FOUND, &module, "Unknown action");
    }
    let mut state = db.write().await;
    let filter = id
        .parse::<u64>()
        .ok()
        .and_then(|id| state.entities.get(EXPORT_FILTERS)?.get(&id).cloned().map(|f| (id, f)));
    let Some((filter_id, filter)) = filter else {
        return error(StatusCode::NOT_FOUND, &module, &format!("Export Filter {id} not found"));
    };

    let primary = filter
        .get("Primary Module")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let criteria = state.filter_criteria.get(&filter_id).cloned().unwrap_or_default();
    let rows: Vec<Entity> = state
        .entities(&primary)
        .into_iter()
        .filter(|e| meets_criteria(e, &criteria))
        .collect();
    let task_id = Uuid::new_v4().to_string();
    let polls_remaining = state.config.task_polls;
    state.tasks.insert(
        task_id.clone(),
        ExportRun {
            rows,
            polls_remaining,
        },
    );
    ok(json!({"Execution Task ID": task_id}))
}

async fn get_task(
    State(db): State<Db>,
    Path((module, action, task_id)): Path<(String, String, String)>,
    Query(params): Query<ListParams>,
) -> ApiResponse {
    if module != EXPORT_FILTERS {
        return error(StatusCode::NOT_FOUND, &module, "Unknown action");
    }
    let mut state = db.write().await;
    let page_size = state.config.page_size;
    let Some(task) = state.tasks.get_mut(&task_id) else {
        return error(StatusCode::NOT_FOUND, &module, "Execution Task not found");
    };

    match action.as_str() {
        "getExecutionTask" => {
            let status = if task.polls_remaining > 0 {
                task.polls_remaining -= 1;
                "Running"
            } else {
                "Finished"
            };
            ok(json!({
                "Execution Task ID": task_id,
                "Execution Task Status": status,
                "Total Records": task.rows.len()
            }))
        }
        "getExecutionTaskResult" => {
            if task.polls_remaining > 0 {
                return error(StatusCode::CONFLICT, &module, "Execution Task not finished");
            }
            let page = params.page.unwrap_or(1);
            ok(json!({
                "entities": page_of(&task.rows, page, page_size),
                "total pages": total_pages(task.rows.len(), page_size),
                "queryId": task_id
            }))
        }
        _ => error(StatusCode::NOT_FOUND, &module, "Unknown action"),
    }
}
