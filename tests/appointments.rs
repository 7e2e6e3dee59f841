mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use chrono::{Days, Utc};
use serde_json::{json, Value};

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn booking_notifies_the_doctor_and_shows_up_today() {
    let state = state().await;
    let (doctor, doctor_token) = user(&state, "dr.adeyemi", "Medical Doctor", false).await;
    let (_, clerk_token) = user(&state, "clerk.funmi", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&clerk_token))
        .set_json(employee("NPA801"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let today = Utc::now().date_naive();
    let req = test::TestRequest::post()
        .uri("/api/v1/appointments/appointments/")
        .insert_header(bearer(&clerk_token))
        .set_json(json!({
            "patient": patient["id"],
            "doctor": doctor.id,
            "appointment_date": today.to_string(),
            "appointment_time": "10:15:00",
            "appointment_type": "follow_up",
            "reason": "Review of lab results",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let appointment: Value = test::read_body_json(resp).await;
    assert_eq!(appointment["status"], "scheduled");
    assert_eq!(appointment["duration_minutes"], 30);
    assert!(appointment["appointment_id"].as_str().unwrap().starts_with("APT-"));
    let id = appointment["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/?type=appointment")
        .insert_header(bearer(&doctor_token))
        .to_request();
    let inbox: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(inbox["count"], 1);
    assert_eq!(inbox["results"][0]["object_id"], id.to_string());

    for uri in ["/api/v1/appointments/appointments/today/", "/api/v1/appointments/appointments/upcoming/"] {
        let req = test::TestRequest::get().uri(uri).insert_header(bearer(&doctor_token)).to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.as_array().unwrap().len(), 1, "{uri}");
        assert_eq!(listed[0]["id"], id);
    }
}

#[actix_web::test]
async fn confirm_and_cancel_follow_the_lifecycle() {
    let state = state().await;
    let (_, token) = user(&state, "clerk.tayo", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA802"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let next_week = Utc::now().date_naive().checked_add_days(Days::new(7)).unwrap();
    let req = test::TestRequest::post()
        .uri("/api/v1/appointments/appointments/")
        .insert_header(bearer(&token))
        .set_json(json!({
            "patient": patient["id"],
            "appointment_date": next_week.to_string(),
            "appointment_time": "08:00:00",
        }))
        .to_request();
    let appointment: Value = test::call_and_read_body_json(&app, req).await;
    let id = appointment["id"].as_i64().unwrap();

    let action = |name: &str| {
        test::TestRequest::post()
            .uri(&format!("/api/v1/appointments/appointments/{id}/{name}/"))
            .insert_header(bearer(&token))
            .to_request()
    };
    let confirmed: Value = test::call_and_read_body_json(&app, action("confirm")).await;
    assert_eq!(confirmed["status"], "confirmed");

    let cancelled: Value = test::call_and_read_body_json(&app, action("cancel")).await;
    assert_eq!(cancelled["status"], "cancelled");

    let resp = test::call_service(&app, action("confirm")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "invalid_transition");

    let req = test::TestRequest::get()
        .uri("/api/v1/appointments/appointments/upcoming/")
        .insert_header(bearer(&token))
        .to_request();
    let upcoming: Value = test::call_and_read_body_json(&app, req).await;
    assert!(upcoming.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn slots_reject_duplicates_and_bad_days() {
    let state = state().await;
    let (doctor, token) = user(&state, "dr.slot", "Medical Doctor", false).await;
    let app = app!(state);

    let slot = json!({
        "doctor": doctor.id,
        "day_of_week": 2,
        "start_time": "09:00:00",
        "end_time": "13:00:00",
    });
    let create = |body: Value| {
        test::TestRequest::post()
            .uri("/api/v1/appointments/slots/")
            .insert_header(bearer(&token))
            .set_json(body)
            .to_request()
    };
    let resp = test::call_service(&app, create(slot.clone())).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(&app, create(slot.clone())).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let mut sunday_plus_one = slot;
    sunday_plus_one["day_of_week"] = json!(7);
    let resp = test::call_service(&app, create(sunday_plus_one)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let errors: Value = test::read_body_json(resp).await;
    assert!(errors.get("day_of_week").is_some());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/appointments/slots/?doctor={}", doctor.id))
        .insert_header(bearer(&token))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["start_time"], "09:00:00");
}
