mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{json, Value};

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn registering_an_employee_assigns_a_staff_number_id() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("npa123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["patient_id"], "E-NPA123");
    assert_eq!(body["is_active"], true);

    // Same personal number gets a suffixed id.
    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA123"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["patient_id"], "E-NPA123-1");
}

#[actix_web::test]
async fn employee_without_personal_number_is_a_field_error() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let mut payload = employee("X1");
    payload["personal_number"] = Value::Null;
    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["personal_number"].is_array());
}

#[actix_web::test]
async fn delete_is_soft_and_hides_the_patient_from_lists() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA900"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let id = patient["id"].as_i64().unwrap();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/patients/{id}/"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/patients/{id}/"))
        .insert_header(bearer(&token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["is_active"], false);

    let req = test::TestRequest::get()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["count"], 0);
}

#[actix_web::test]
async fn patient_changes_land_in_the_audit_trail() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA777"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let id = patient["id"].as_i64().unwrap();

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/patients/{id}/"))
        .insert_header(bearer(&token))
        .set_json(json!({ "phone": "08011112222" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/v1/activity-logs/?module=patients")
        .insert_header(bearer(&token))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["count"], 2);
    let actions: Vec<&str> = page["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|log| log["action"].as_str())
        .collect();
    assert!(actions.contains(&"create"));
    assert!(actions.contains(&"update"));
}

#[actix_web::test]
async fn non_numeric_ids_are_not_found() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/v1/patients/abc/")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri("/api/v1/patients/9999/")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn search_treats_wildcards_literally() {
    let state = state().await;
    let (_, token) = user(&state, "records.ngozi", "Medical Records Officer", false).await;
    let app = app!(state);

    for pn in ["NPA500", "NPA5X0"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/patients/")
            .insert_header(bearer(&token))
            .set_json(employee(pn))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    for (search, expected) in [("NPA5_0", 0), ("NPA5%25", 0), ("NPA50", 1), ("npa5", 2)] {
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/patients/?search={search}"))
            .insert_header(bearer(&token))
            .to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["count"], expected, "search {search}");
    }
}
