//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts the mock server on a random port, then drives a real
//! `RadiusInstance` over ureq with HTTP Digest authentication, so request
//! building, the digest handshake and response parsing are all exercised
//! together.

use std::sync::Arc;
use std::time::Duration;

use mock_server::{MockConfig, MockState};
use pretty_assertions::assert_eq;
use radius_core::{
    ClientConfig, Credentials, EntityPayload, FieldList, FieldType, NotFoundKind, PollPolicy, RadiusError,
    RadiusInstance, RequestKind, ValidationKind,
};
use serde_json::json;

/// Start a seeded mock server and return a base URL on its host.
fn start_mock(config: MockConfig) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener, MockState::seeded(config)).await
        })
        .unwrap();
    });

    format!("http://{addr}/crm/home")
}

fn fast_poll() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(10), 3)
}

fn connect_to(base_url: &str) -> RadiusInstance {
    let defaults = MockConfig::default();
    let config = ClientConfig::new(base_url, Credentials::new(defaults.username, defaults.password))
        .with_timeout(Duration::from_secs(10))
        .with_poll(fast_poll());
    RadiusInstance::connect(config).unwrap()
}

fn connect() -> RadiusInstance {
    connect_to(&start_mock(MockConfig::default()))
}

#[test]
fn connect_discovers_modules() {
    let base_url = start_mock(MockConfig::default());
    let instance = connect_to(&base_url);

    let names: Vec<&str> = instance.all_modules().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Contacts", "Registrations", "ExportFilters"]);
    assert_eq!(instance.module_name("People").unwrap(), "Contacts");
    assert_eq!(
        instance.to_string(),
        format!("<Instance of Radius Web Service on {base_url}, as user: webservice>")
    );

    let err = instance.module_name("Widgets").unwrap_err();
    assert!(matches!(err, RadiusError::NotFound { kind: NotFoundKind::Module, .. }));
}

#[test]
fn wrong_password_is_authentication_error() {
    let base_url = start_mock(MockConfig::default());
    let err = RadiusInstance::new("webservice", "not-it", &base_url).unwrap_err();
    assert!(matches!(err, RadiusError::Authentication(_)), "got {err:?}");
}

#[test]
fn fields_metadata_and_schema_cache() {
    let instance = connect();

    match instance.get_all_fields("Contacts", false).unwrap() {
        FieldList::Names(names) => assert!(names.contains(&"Email Address".to_string())),
        other => panic!("expected names, got {other:?}"),
    }
    match instance.get_all_fields("People", true).unwrap() {
        FieldList::Details(fields) => {
            let status = fields.iter().find(|f| f.key == "Status").unwrap();
            assert_eq!(
                status.data_type,
                FieldType::Picklist(vec!["Active".to_string(), "Inactive".to_string()])
            );
        }
        other => panic!("expected details, got {other:?}"),
    }

    let metadata = instance.get_metadata("Contacts").unwrap();
    assert_eq!(metadata["module name"], "Contacts");

    let first = instance.schema("Contacts").unwrap();
    let second = instance.schema("People").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    instance.invalidate_schema("Contacts");
    let refreshed = instance.schema("Contacts").unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(first.len(), refreshed.len());
}

#[test]
fn crud_lifecycle() {
    let instance = connect();

    // Create, dropping the unknown field and resolving the Email label.
    let payload = EntityPayload::new()
        .field("First Name", "Grace")
        .field("Last Name", "Hopper")
        .field("Email", "grace@example.edu")
        .field("Status", "Active")
        .field("Interests", "Music")
        .field("Nickname", "Amazing Grace");
    let created = instance.create_entity("Contacts", &payload, false).unwrap();
    let id = created["Entity ID"].clone();
    assert!(id.is_u64());
    assert_eq!(created.len(), 1);

    // Read back every field.
    let fetched = instance.get_entity("Contacts", &id, &[]).unwrap();
    assert_eq!(fetched["Email Address"], "grace@example.edu");
    assert_eq!(fetched["Interests"], json!(["Music"]));
    assert!(fetched.get("Nickname").is_none());

    // Read back selected fields.
    let partial = instance.get_entity("Contacts", &id, &["First Name", "Status"]).unwrap();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial["First Name"], "Grace");

    // Update, asking for fields back.
    let update = EntityPayload::new()
        .field("Status", "Inactive")
        .returning(["Status", "Last Name"]);
    let updated = instance.update_entity("Contacts", &id, &update, true).unwrap();
    assert_eq!(updated["Status"], "Inactive");
    assert_eq!(updated["Last Name"], "Hopper");

    // Search by the new value.
    let search = instance
        .create_request_object(
            "Contacts",
            &EntityPayload::new().field("Last Name", "Hopper"),
            RequestKind::Search,
            true,
        )
        .unwrap();
    let found = instance.search_for_entities("Contacts", &search).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["Status"], "Inactive");

    // Delete, then reads fail.
    let outcome = instance.delete_entity("Contacts", &id).unwrap();
    assert!(outcome.is_ok());
    assert!(outcome.message.contains("deleted"));

    let err = instance.get_entity("Contacts", &id, &[]).unwrap_err();
    assert!(matches!(err, RadiusError::RemoteService { status: 404, .. }), "got {err:?}");
}

#[test]
fn validation_failures_never_reach_the_server() {
    let instance = connect();

    let strict = EntityPayload::new()
        .field("First Name", "Jane")
        .field("Nickname", "J");
    let err = instance.create_entity("Contacts", &strict, true).unwrap_err();
    assert_eq!(err.validation_kind(), Some(ValidationKind::UnknownField));

    let bad_value = EntityPayload::new()
        .field("First Name", "Jane")
        .field("Status", "Pending");
    let err = instance.create_entity("Contacts", &bad_value, false).unwrap_err();
    assert_eq!(err.validation_kind(), Some(ValidationKind::InvalidValue));

    let everyone = instance
        .create_request_object("Contacts", &EntityPayload::new(), RequestKind::Search, false)
        .unwrap();
    assert_eq!(instance.search_for_entities("Contacts", &everyone).unwrap().len(), 3);
}

#[test]
fn search_follows_pagination() {
    let base_url = start_mock(MockConfig {
        page_size: 1,
        ..MockConfig::default()
    });
    let instance = connect_to(&base_url);

    let body = instance
        .create_request_object("Contacts", &EntityPayload::new(), RequestKind::Search, false)
        .unwrap();
    let all = instance.search_for_entities("Contacts", &body).unwrap();
    let last_names: Vec<&str> = all.iter().map(|e| e["Last Name"].as_str().unwrap()).collect();
    assert_eq!(last_names, vec!["Doe", "Roe", "Lovelace"]);
}

#[test]
fn registration_update_is_completed_from_stored_entity() {
    let instance = connect();

    let body = instance
        .create_request_object("Registrations", &EntityPayload::new(), RequestKind::Search, false)
        .unwrap();
    let registration = instance.search_for_entities("Registrations", &body).unwrap().remove(0);
    let id = registration["Entity ID"].clone();

    let update = EntityPayload::new()
        .field("Status", "Attended")
        .returning(["Status", "Participant", "Iteration Name"]);
    let updated = instance.update_entity("Registrations", &id, &update, true).unwrap();
    assert_eq!(updated["Status"], "Attended");
    assert_eq!(updated["Participant"], registration["Participant"]);
    assert_eq!(updated["Iteration Name"], "Fall 2018");
}

#[test]
fn export_filters_by_name() {
    let instance = connect();

    let active = instance.get_active_export_filters().unwrap();
    let names: Vec<&str> = active.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Active Contacts", "All Registrations", "Nobody"]);

    let id = instance.get_export_filter_id_by_name("Active Contacts").unwrap();
    assert_eq!(id, active[0].id);

    let err = instance.get_export_filter_id_by_name("No Such Filter").unwrap_err();
    assert!(matches!(err, RadiusError::NotFound { kind: NotFoundKind::ExportFilter, .. }));

    // The composed helper matches the manual chain.
    let task = instance.export_filter_create_task(&id).unwrap();
    let manual = instance.get_export_filter_as_list(&task).unwrap();
    let composed = instance.get_export_filter_by_name_as_list("Active Contacts", None).unwrap();
    assert_eq!(composed, manual);
    let first_names: Vec<&str> = manual.iter().map(|e| e["First Name"].as_str().unwrap()).collect();
    assert_eq!(first_names, vec!["Jane", "Ada"]);

    let empty = instance.get_export_filter_by_name_as_list("Nobody", None).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn export_filter_as_csv_file() {
    let instance = connect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.csv");

    let id = instance.get_export_filter_id_by_name("Active Contacts").unwrap();
    let task = instance.export_filter_create_task(&id).unwrap();
    let rows = instance.get_export_filter_as_file(&task, &path).unwrap();
    assert_eq!(rows, 2);

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "First Name,Last Name,Status,Entity ID");
    assert!(lines[1].starts_with("Jane,Doe,Active,"));
    assert!(lines[2].starts_with("Ada,Lovelace,Active,"));
    assert_eq!(lines.len(), 3);
}

#[test]
fn slow_export_task_times_out() {
    let base_url = start_mock(MockConfig {
        task_polls: 10,
        ..MockConfig::default()
    });
    let instance = connect_to(&base_url);

    let id = instance.get_export_filter_id_by_name("All Registrations").unwrap();
    let task = instance.export_filter_create_task(&id).unwrap();
    let err = instance
        .get_export_filter_as_list_with(&task, PollPolicy::new(Duration::from_millis(1), 2))
        .unwrap_err();
    match err {
        RadiusError::Timeout { checks, last_status, .. } => {
            assert_eq!(checks, 2);
            assert_eq!(last_status, "Running");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}
