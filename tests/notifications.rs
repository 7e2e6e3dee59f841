mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::Value;

use emr::models::notification::{NewNotification, NotificationKind};

use common::{app, bearer, state, user};

#[actix_web::test]
async fn notifications_are_private_to_their_recipient() {
    let state = state().await;
    let (alice, alice_token) = user(&state, "alice", "Medical Doctor", false).await;
    let (bob, _) = user(&state, "bob", "Medical Doctor", false).await;

    for title in ["First", "Second"] {
        state
            .ehr
            .create_notification(alice.id, &NewNotification::new(NotificationKind::System, title, "For Alice"))
            .await
            .unwrap();
    }
    let theirs = state
        .ehr
        .create_notification(bob.id, &NewNotification::new(NotificationKind::System, "Hidden", "For Bob"))
        .await
        .unwrap()
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/")
        .insert_header(bearer(&alice_token))
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["count"], 2);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/notifications/{}/", theirs.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/api/v1/notifications/mark_all_read/")
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["message"], "2 notifications marked as read");

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread_count/")
        .insert_header(bearer(&alice_token))
        .to_request();
    let unread: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(unread["count"], 0);
}
