mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{json, Value};

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn dispensing_draws_stock_and_tracks_progress() {
    let state = state().await;
    let (doctor, doctor_token) = user(&state, "dr.bako", "Medical Doctor", false).await;
    let (_, pharmacist_token) = user(&state, "pharm.uche", "Pharmacist", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&doctor_token))
        .set_json(employee("NPA610"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/medications/")
        .insert_header(bearer(&pharmacist_token))
        .set_json(json!({ "name": "Amoxicillin", "code": "AMX500", "unit": "capsule", "strength": "500mg" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let medication: Value = test::read_body_json(resp).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/inventory/")
        .insert_header(bearer(&pharmacist_token))
        .set_json(json!({
            "medication": medication["id"],
            "batch_number": "B-001",
            "expiry_date": "2099-12-31",
            "quantity": 6,
            "min_stock_level": 2,
        }))
        .to_request();
    let stock: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/prescriptions/")
        .insert_header(bearer(&doctor_token))
        .set_json(json!({
            "patient": patient["id"],
            "doctor": doctor.id,
            "diagnosis": "Tonsillitis",
            "medications": [{ "medication": medication["id"], "quantity": 10, "dosage": "1 cap", "frequency": "tds" }],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let prescription: Value = test::read_body_json(resp).await;
    assert_eq!(prescription["status"], "pending");
    let prescription_id = prescription["id"].as_i64().unwrap();
    let item_id = prescription["medications"][0]["id"].as_i64().unwrap();

    // Pharmacists are told about new prescriptions.
    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread_count/")
        .insert_header(bearer(&pharmacist_token))
        .to_request();
    let unread: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(unread["count"], 1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/prescriptions/{prescription_id}/dispense/"))
        .insert_header(bearer(&pharmacist_token))
        .set_json(json!({ "item_id": item_id, "quantity": 8, "inventory_id": stock["id"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["quantity"][0], "Insufficient stock");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/prescriptions/{prescription_id}/dispense/"))
        .insert_header(bearer(&pharmacist_token))
        .set_json(json!({ "item_id": item_id, "quantity": 4, "inventory_id": stock["id"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/prescriptions/{prescription_id}/"))
        .insert_header(bearer(&pharmacist_token))
        .to_request();
    let prescription: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(prescription["status"], "partially_dispensed");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/inventory/{}/", stock["id"]))
        .insert_header(bearer(&pharmacist_token))
        .to_request();
    let stock: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stock["quantity"], 2.0);
    assert_eq!(stock["is_low_stock"], true);
}

#[actix_web::test]
async fn cancelled_prescriptions_cannot_be_dispensed() {
    let state = state().await;
    let (_, token) = user(&state, "pharm.uche", "Pharmacist", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA611"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/medications/")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "Paracetamol", "code": "PCM", "unit": "tablet" }))
        .to_request();
    let medication: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/prescriptions/")
        .insert_header(bearer(&token))
        .set_json(json!({
            "patient": patient["id"],
            "medications": [{ "medication": medication["id"], "quantity": 12 }],
        }))
        .to_request();
    let prescription: Value = test::call_and_read_body_json(&app, req).await;
    let id = prescription["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/prescriptions/{id}/cancel/"))
        .insert_header(bearer(&token))
        .to_request();
    let cancelled: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(cancelled["status"], "cancelled");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/prescriptions/{id}/dispense/"))
        .insert_header(bearer(&token))
        .set_json(json!({ "item_id": prescription["medications"][0]["id"], "quantity": 1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "invalid_transition");
}
