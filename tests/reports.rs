mod common;

use actix_web::http::{header, StatusCode};
use actix_web::test;
use serde_json::Value;

use common::{app, bearer, employee, state, user};

#[actix_web::test]
async fn health_reports_every_service() {
    let state = state().await;
    let app = app!(state);

    let req = test::TestRequest::get().uri("/api/v1/health/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["database"], "healthy");
    assert_eq!(body["services"]["cache"], "healthy");
}

#[actix_web::test]
async fn demographics_export_as_csv() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    for pn in ["NPA801", "NPA802"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/patients/")
            .insert_header(bearer(&token))
            .set_json(employee(pn))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/reports/patient-demographics/?format=csv")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/csv");
    assert!(resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("patient_demographics.csv"));
    let body = test::read_body(resp).await;
    let csv = std::str::from_utf8(&body).unwrap();
    assert!(csv.starts_with("Metric,Value\r\n"));
    assert!(csv.contains("total_patients,2\r\n"));

    let req = test::TestRequest::get()
        .uri("/api/v1/reports/patient-demographics/")
        .insert_header(bearer(&token))
        .to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["total_patients"], 2);
}

#[actix_web::test]
async fn dashboard_counts_patients() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/patients/")
        .insert_header(bearer(&token))
        .set_json(employee("NPA803"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/dashboard/stats/")
        .insert_header(bearer(&token))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["patients"]["total"], 1);
    assert_eq!(stats["patients"]["new_today"], 1);
}

#[actix_web::test]
async fn unknown_report_format_is_a_bad_request() {
    let state = state().await;
    let (_, token) = user(&state, "records", "Medical Records Officer", false).await;
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/v1/reports/patient-demographics/?format=xml")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
