mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{json, Value};

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn queue_is_called_in_priority_order() {
    let state = state().await;
    let (_, token) = user(&state, "nurse.kemi", "Nursing Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/consultation-rooms/")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "GOPD 1", "room_number": "G-01" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let room: Value = test::read_body_json(resp).await;
    let room_id = room["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/consultation-rooms/{room_id}/call_next/"))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let mut patients = Vec::new();
    for pn in ["NPA701", "NPA702"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/patients/")
            .insert_header(bearer(&token))
            .set_json(employee(pn))
            .to_request();
        let patient: Value = test::call_and_read_body_json(&app, req).await;
        patients.push(patient["id"].as_i64().unwrap());
    }

    // Routine patient arrives first, emergency second.
    for (patient, priority) in [(patients[0], 3), (patients[1], 0)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/consultation-queue/")
            .insert_header(bearer(&token))
            .set_json(json!({ "room": room_id, "patient": patient, "priority": priority }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/consultation-rooms/{room_id}/queue/"))
        .insert_header(bearer(&token))
        .to_request();
    let queue: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(queue.as_array().unwrap().len(), 2);
    assert_eq!(queue[0]["patient"], patients[1]);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/consultation-rooms/{room_id}/call_next/"))
        .insert_header(bearer(&token))
        .to_request();
    let called: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(called["patient"], patients[1]);
    assert!(called["called_at"].is_string());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/consultation-rooms/{room_id}/queue/"))
        .insert_header(bearer(&token))
        .to_request();
    let queue: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["patient"], patients[0]);
}

#[actix_web::test]
async fn queueing_into_a_missing_room_fails() {
    let state = state().await;
    let (_, token) = user(&state, "nurse.kemi", "Nursing Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/consultation-queue/")
        .insert_header(bearer(&token))
        .set_json(json!({ "room": 404, "patient": 1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["room"].is_array());
}

#[actix_web::test]
async fn concurrent_call_next_hands_out_distinct_patients() {
    let state = state().await;
    let (_, token) = user(&state, "nurse.bola", "Nursing Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/consultation-rooms/")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "GOPD 3", "room_number": "G-03" }))
        .to_request();
    let room: Value = test::call_and_read_body_json(&app, req).await;
    let room_id = room["id"].as_i64().unwrap();

    let mut patients = Vec::new();
    for pn in ["NPA731", "NPA732"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/patients/")
            .insert_header(bearer(&token))
            .set_json(employee(pn))
            .to_request();
        let patient: Value = test::call_and_read_body_json(&app, req).await;
        let patient_id = patient["id"].as_i64().unwrap();
        let req = test::TestRequest::post()
            .uri("/api/v1/consultation-queue/")
            .insert_header(bearer(&token))
            .set_json(json!({ "room": room_id, "patient": patient_id }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        patients.push(patient_id);
    }

    let call = || {
        test::TestRequest::post()
            .uri(&format!("/api/v1/consultation-rooms/{room_id}/call_next/"))
            .insert_header(bearer(&token))
            .to_request()
    };
    let (first, second) = futures::join!(test::call_service(&app, call()), test::call_service(&app, call()));
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    let first: Value = test::read_body_json(first).await;
    let second: Value = test::read_body_json(second).await;
    let mut called = vec![first["patient"].as_i64().unwrap(), second["patient"].as_i64().unwrap()];
    called.sort();
    assert_eq!(called, patients);
}
