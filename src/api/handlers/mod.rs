//! Request handlers, one submodule per clinical area.

use actix_web::HttpResponse;
use serde::Serialize;
use tracing::warn;

use crate::db::{ListParams, PageRequest};
use crate::error::ApiError;
use crate::models::audit::NewActivity;
use crate::models::notification::NewNotification;
use crate::AppState;

pub mod appointments;
pub mod audit;
pub mod auth;
pub mod consultation;
pub mod health;
pub mod laboratory;
pub mod notifications;
pub mod nursing;
pub mod organization;
pub mod patients;
pub mod permissions;
pub mod pharmacy;
pub mod radiology;
pub mod reports;
pub mod users;
pub mod visits;

pub type ApiResult = Result<HttpResponse, ApiError>;

pub(crate) fn page_request(state: &AppState, params: &ListParams) -> PageRequest {
    params.page_request(&state.config.pagination)
}

pub(crate) fn created<T: Serialize>(body: &T) -> HttpResponse {
    HttpResponse::Created().json(body)
}

pub(crate) fn no_content() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// Appends an audit row. A failed write is logged, the request still succeeds.
pub(crate) async fn audit(state: &AppState, entry: NewActivity) {
    if let Err(e) = state.ehr.log_activity(entry).await {
        warn!(error = %e, "Failed to write audit log");
    }
}

pub(crate) async fn notify_user(state: &AppState, user_id: Option<i64>, note: NewNotification) {
    let Some(user_id) = user_id else { return };
    if let Err(e) = state.ehr.create_notification(user_id, &note).await {
        warn!(user_id, error = %e, "Failed to create notification");
    }
}

pub(crate) async fn notify_role(state: &AppState, system_role: &str, note: NewNotification) {
    if let Err(e) = state.ehr.notify_role(system_role, &note).await {
        warn!(system_role, error = %e, "Failed to notify role");
    }
}
