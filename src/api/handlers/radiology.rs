//! Imaging orders, the study workflow and report review.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{audit, created, no_content, notify_user, page_request, ApiResult};
use crate::api::middleware::{AuthUser, ClientInfo};
use crate::db::ListParams;
use crate::models::audit::{AuditAction, NewActivity};
use crate::models::notification::{NewNotification, NotificationKind, NotificationPriority};
use crate::models::radiology::{
    AcquireStudy, NewRadiologyOrder, RadiologyOrderFilter, RadiologyOrderUpdate, RadiologyReportFilter,
    RejectRadiologyReport, RejectedReport, ReportStudy, ScheduleStudy, VerifyRadiologyReport,
};
use crate::AppState;

const MODULE: &str = "radiology";

// ===== Orders =====

pub async fn list_orders(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<RadiologyOrderFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_radiology_orders(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_order(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<NewRadiologyOrder>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_radiology_order(input, Some(user.id)).await?))
}

pub async fn order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_radiology_order(id.into_inner()).await?))
}

pub async fn update_order(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<RadiologyOrderUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(
        state
            .ehr
            .update_radiology_order(id.into_inner(), body.into_inner())
            .await?,
    ))
}

pub async fn delete_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_radiology_order(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn schedule(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ScheduleStudy>,
) -> ApiResult {
    let study = state
        .ehr
        .schedule_study(id.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(study))
}

pub async fn acquire(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<AcquireStudy>,
) -> ApiResult {
    let study = state
        .ehr
        .acquire_study(id.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(study))
}

/// Files the report and tells the ordering doctor; critical findings go out urgent.
pub async fn report(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ReportStudy>,
) -> ApiResult {
    let order_id = id.into_inner();
    let input = body.into_inner();
    let critical = input.critical;
    let (study, report) = state.ehr.report_study(order_id, input, user.id).await?;

    let order = state.ehr.get_radiology_order(order_id).await?;
    let (title, priority) = if critical {
        ("Critical radiology finding", NotificationPriority::Urgent)
    } else {
        ("Radiology report ready", NotificationPriority::Normal)
    };
    notify_user(
        &state,
        order.doctor_id,
        NewNotification::new(
            NotificationKind::RadiologyResult,
            title,
            format!(
                "{} ({}) for {} has been reported.",
                study.procedure, order.order_id, order.patient_name
            ),
        )
        .priority(priority)
        .link(format!("/radiology/reports/{}", report.id))
        .object("radiology_report", report.id),
    )
    .await;
    Ok(HttpResponse::Ok().json(study))
}

// ===== Reports =====

pub async fn list_reports(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<RadiologyReportFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_radiology_reports(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn report_detail(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_radiology_report(id.into_inner()).await?))
}

pub async fn verify_report(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    id: web::Path<i64>,
    body: web::Json<VerifyRadiologyReport>,
) -> ApiResult {
    let report = state
        .ehr
        .verify_radiology_report(id.into_inner(), body.into_inner(), user.id)
        .await?;

    audit(
        &state,
        NewActivity::new(AuditAction::Verify, MODULE, "radiology_order", report.order_pk)
            .by(Some(user.id))
            .repr(format!("Radiology Order {}", report.order_id))
            .describe(format!("Verified radiology report {} for {}", report.id, report.patient_name))
            .client(&client),
    )
    .await;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn reject_report(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<RejectRadiologyReport>,
) -> ApiResult {
    let study = state
        .ehr
        .reject_radiology_report(id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(RejectedReport {
        message: "Report rejected and sent back for revision",
        study,
    }))
}
