//! Verify build/parse methods against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, expected requests, simulated responses,
//! and expected parse results or errors. Comparing parsed JSON (not raw
//! strings) avoids false negatives from field-ordering differences.

use pretty_assertions::assert_eq;
use radius_core::{
    DeleteOutcome, Entity, EntityPage, ExportTask, HttpMethod, HttpRequest, HttpResponse, PageCursor,
    RadiusClient, RadiusError, RequestBody, Result, TaskStatus,
};
use serde_json::Value;

const BASE_URL: &str = "https://crm.example.edu/crm/home";
const SERVER: &str = "https://crm.example.edu/crm/webservice/modules";

fn client() -> RadiusClient {
    RadiusClient::new(BASE_URL).unwrap()
}

fn load(raw: &str) -> Vec<Value> {
    let vectors: Value = serde_json::from_str(raw).unwrap();
    vectors["cases"].as_array().unwrap().clone()
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn check_request(name: &str, req: &HttpRequest, expected: &Value) {
    assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
    assert_eq!(req.path, format!("{SERVER}{}", expected["path"].as_str().unwrap()), "{name}: path");

    if let Some(headers) = expected.get("headers") {
        let expected_headers: Vec<(String, String)> = headers
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let arr = h.as_array().unwrap();
                (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");
    }

    match expected.get("body") {
        Some(body) => {
            let req_body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
            assert_eq!(&req_body, body, "{name}: body");
        }
        None => assert!(req.body.is_none(), "{name}: body should be None"),
    }
}

fn simulated(case: &Value) -> HttpResponse {
    let sim = &case["simulated_response"];
    HttpResponse {
        status: sim["status"].as_u64().unwrap() as u16,
        headers: Vec::new(),
        body: sim["body"].as_str().unwrap().to_string(),
    }
}

fn cursor(case: &Value) -> Option<PageCursor> {
    case.get("cursor").filter(|c| !c.is_null()).map(|c| PageCursor {
        page: c["page"].as_u64().unwrap() as u32,
        query_id: c["query_id"].as_str().unwrap().to_string(),
    })
}

/// Compare a parse result with the case's `expected_result` or `expected_error`.
fn check_outcome<T>(name: &str, case: &Value, result: Result<T>)
where
    T: std::fmt::Debug + PartialEq + serde::de::DeserializeOwned,
{
    let Some(expected_error) = case.get("expected_error") else {
        let expected: T = serde_json::from_value(case["expected_result"].clone()).unwrap();
        assert_eq!(result.unwrap(), expected, "{name}: parsed result");
        return;
    };

    let err = result.unwrap_err();
    match expected_error["kind"].as_str().unwrap() {
        "Authentication" => assert!(matches!(err, RadiusError::Authentication(_)), "{name}: got {err:?}"),
        "Deserialization" => assert!(matches!(err, RadiusError::Deserialization(_)), "{name}: got {err:?}"),
        "RemoteService" => match err {
            RadiusError::RemoteService { status, message, .. } => {
                assert_eq!(u64::from(status), expected_error["status"].as_u64().unwrap(), "{name}: status");
                assert_eq!(message, expected_error["message"].as_str().unwrap(), "{name}: message");
            }
            other => panic!("{name}: expected RemoteService, got {other:?}"),
        },
        other => panic!("{name}: unknown expected_error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/create.json")) {
        let name = case["name"].as_str().unwrap();
        let module = case["module"].as_str().unwrap();
        let input: RequestBody = serde_json::from_value(case["input"].clone()).unwrap();

        let req = c.build_create_entity(module, &input).unwrap();
        check_request(name, &req, &case["expected_request"]);

        let result = c.parse_entity(simulated(&case), module);
        check_outcome::<Entity>(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

#[test]
fn get_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/get.json")) {
        let name = case["name"].as_str().unwrap();
        let module = case["module"].as_str().unwrap();
        let id = case["input_id"].as_str().unwrap();
        let return_fields: Vec<&str> = case["return_fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f.as_str().unwrap())
            .collect();

        let req = c.build_get_entity(module, id, &return_fields);
        check_request(name, &req, &case["expected_request"]);

        let result = c.parse_entity(simulated(&case), module);
        check_outcome::<Entity>(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[test]
fn update_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/update.json")) {
        let name = case["name"].as_str().unwrap();
        let module = case["module"].as_str().unwrap();
        let id = case["input_id"].as_str().unwrap();
        let input: RequestBody = serde_json::from_value(case["input"].clone()).unwrap();

        let req = c.build_update_entity(module, id, &input).unwrap();
        check_request(name, &req, &case["expected_request"]);

        let result = c.parse_entity(simulated(&case), module);
        check_outcome::<Entity>(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[test]
fn delete_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/delete.json")) {
        let name = case["name"].as_str().unwrap();
        let module = case["module"].as_str().unwrap();
        let id = case["input_id"].as_str().unwrap();

        let req = c.build_delete_entity(module, id);
        check_request(name, &req, &case["expected_request"]);

        let result = c.parse_delete(simulated(&case), module);
        check_outcome::<DeleteOutcome>(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[test]
fn search_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/search.json")) {
        let name = case["name"].as_str().unwrap();
        let module = case["module"].as_str().unwrap();
        let input: RequestBody = serde_json::from_value(case["input"].clone()).unwrap();
        let page = cursor(&case);

        let req = c.build_search(module, &input, page.as_ref()).unwrap();
        check_request(name, &req, &case["expected_request"]);

        let result = c.parse_entity_page(simulated(&case), module);
        check_outcome::<EntityPage>(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Export tasks
// ---------------------------------------------------------------------------

#[test]
fn export_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/export.json")) {
        let name = case["name"].as_str().unwrap();
        let id = case["input_id"].as_str().unwrap();
        let task = ExportTask::new(id);

        match case["operation"].as_str().unwrap() {
            "create_task" => {
                let req = c.build_create_export_task(id);
                check_request(name, &req, &case["expected_request"]);
                check_outcome::<ExportTask>(name, &case, c.parse_export_task(simulated(&case)));
            }
            "get_task" => {
                let req = c.build_get_export_task(&task);
                check_request(name, &req, &case["expected_request"]);
                check_outcome::<TaskStatus>(name, &case, c.parse_task_status(simulated(&case)));
            }
            "get_result" => {
                let page = cursor(&case);
                let req = c.build_get_export_task_result(&task, page.as_ref());
                check_request(name, &req, &case["expected_request"]);
                let result = c.parse_entity_page(simulated(&case), "ExportFilters");
                check_outcome::<EntityPage>(name, &case, result);
            }
            other => panic!("{name}: unknown operation: {other}"),
        }
    }
}
