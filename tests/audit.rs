mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::Value;

use common::{app, bearer, state, user};

#[actix_web::test]
async fn stats_accept_extreme_windows() {
    let state = state().await;
    let (_, token) = user(&state, "auditor", "Medical Doctor", false).await;
    let app = app!(state);

    for days in [i64::MAX, i64::MIN] {
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/activity-logs/stats/?days={days}"))
            .insert_header(bearer(&token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let stats: Value = test::read_body_json(resp).await;
        assert!(stats["total_actions"].is_i64());
    }
}
