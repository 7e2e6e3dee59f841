mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{json, Value};

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn lab_order_moves_through_its_workflow() {
    let state = state().await;
    let (doctor, doctor_token) = user(&state, "dr.adams", "Medical Doctor", false).await;
    let (_, lab_token) = user(&state, "lab.tech", "Laboratory Scientist", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&doctor_token))
        .set_json(employee("NPA501"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/lab-orders/")
        .insert_header(bearer(&doctor_token))
        .set_json(json!({
            "patient": patient["id"],
            "doctor": doctor.id,
            "priority": "urgent",
            "tests": [{ "name": "Full Blood Count", "code": "FBC", "sample_type": "blood" }],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let order: Value = test::read_body_json(resp).await;
    let order_id = order["id"].as_i64().unwrap();
    let test_id = order["tests"][0]["id"].as_i64().unwrap();
    assert_eq!(order["tests"][0]["status"], "pending");

    // Results cannot skip collection and processing.
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/lab-orders/{order_id}/submit_results/"))
        .insert_header(bearer(&lab_token))
        .set_json(json!({ "test_id": test_id, "results": { "hb": 13.5 } }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "invalid_transition");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/lab-orders/{order_id}/collect_sample/"))
        .insert_header(bearer(&lab_token))
        .set_json(json!({ "test_id": test_id, "collection_method": "venipuncture" }))
        .to_request();
    let collected: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(collected["status"], "sample_collected");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/lab-orders/{order_id}/process/"))
        .insert_header(bearer(&lab_token))
        .set_json(json!({ "test_id": test_id, "processing_method": "in_house" }))
        .to_request();
    let processing: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(processing["status"], "processing");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/lab-orders/{order_id}/submit_results/"))
        .insert_header(bearer(&lab_token))
        .set_json(json!({ "test_id": test_id, "results": { "hb": 13.5 } }))
        .to_request();
    let ready: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ready["status"], "results_ready");

    // The ordering doctor hears about it.
    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread_count/")
        .insert_header(bearer(&doctor_token))
        .to_request();
    let unread: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(unread["count"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/lab-results/?patient={}", patient["id"]))
        .insert_header(bearer(&doctor_token))
        .to_request();
    let results: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(results["count"], 1);
    let result_id = results["results"][0]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/lab-results/{result_id}/verify/"))
        .insert_header(bearer(&doctor_token))
        .set_json(json!({ "overall_status": "normal" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/lab-tests/{test_id}/"))
        .insert_header(bearer(&doctor_token))
        .to_request();
    let verified: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(verified["status"], "verified");
}

#[actix_web::test]
async fn lab_order_needs_at_least_one_test() {
    let state = state().await;
    let (_, token) = user(&state, "dr.adams", "Medical Doctor", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA502"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/lab-orders/")
        .insert_header(bearer(&token))
        .set_json(json!({ "patient": patient["id"], "tests": [] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["tests"].is_array());
}
