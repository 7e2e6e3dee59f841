//! The caller's own notifications and delivery preferences.

use actix_web::{web, HttpResponse};
use serde_json::json;

use super::{no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::notification::{NotificationFilter, PreferencesUpdate};
use crate::AppState;

pub async fn list(
    state: web::Data<AppState>,
    user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<NotificationFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_notifications(user.id, &filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn detail(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_notification(user.id, id.into_inner()).await?))
}

pub async fn delete(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_notification(user.id, id.into_inner()).await?;
    Ok(no_content())
}

pub async fn mark_read(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.mark_notification_read(user.id, id.into_inner()).await?))
}

pub async fn mark_all_read(state: web::Data<AppState>, user: AuthUser) -> ApiResult {
    let count = state.ehr.mark_all_notifications_read(user.id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("{count} notifications marked as read"),
        "count": count,
    })))
}

pub async fn archive(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.archive_notification(user.id, id.into_inner()).await?))
}

pub async fn unread_count(state: web::Data<AppState>, user: AuthUser) -> ApiResult {
    let count = state.ehr.unread_notification_count(user.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

// ===== Preferences =====

pub async fn preferences(state: web::Data<AppState>, user: AuthUser) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.notification_preferences(user.id).await?))
}

pub async fn update_preferences(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<PreferencesUpdate>,
) -> ApiResult {
    let prefs = state
        .ehr
        .update_notification_preferences(user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(prefs))
}
