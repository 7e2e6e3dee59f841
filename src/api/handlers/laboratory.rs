//! Lab templates, orders with their test workflow, and result review.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{audit, created, no_content, notify_user, page_request, ApiResult};
use crate::api::middleware::{AuthUser, ClientInfo};
use crate::db::ListParams;
use crate::models::audit::{AuditAction, NewActivity};
use crate::models::laboratory::{
    CollectSample, LabOrderFilter, LabOrderUpdate, LabResultFilter, LabTemplateFilter, LabTemplateInput,
    LabTestFilter, NewLabOrder, ProcessTest, SubmitResults, VerifyLabResult,
};
use crate::models::notification::{NewNotification, NotificationKind};
use crate::AppState;

const MODULE: &str = "laboratory";

// ===== Templates =====

pub async fn list_templates(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<LabTemplateFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_lab_templates(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_template(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<LabTemplateInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_lab_template(input).await?))
}

pub async fn template(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_lab_template(id.into_inner()).await?))
}

pub async fn update_template(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<LabTemplateInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_lab_template(id.into_inner(), input).await?))
}

pub async fn delete_template(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_lab_template(id.into_inner()).await?;
    Ok(no_content())
}

// ===== Orders =====

pub async fn list_orders(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<LabOrderFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_lab_orders(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_order(state: web::Data<AppState>, user: AuthUser, body: web::Json<NewLabOrder>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_lab_order(input, Some(user.id)).await?))
}

pub async fn order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_lab_order(id.into_inner()).await?))
}

pub async fn update_order(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<LabOrderUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.update_lab_order(id.into_inner(), body.into_inner()).await?))
}

pub async fn delete_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_lab_order(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn collect_sample(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<CollectSample>,
) -> ApiResult {
    let test = state
        .ehr
        .collect_sample(id.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(test))
}

pub async fn process(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ProcessTest>,
) -> ApiResult {
    let test = state
        .ehr
        .process_lab_test(id.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(test))
}

/// Stores results and tells the ordering doctor they are ready.
pub async fn submit_results(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<SubmitResults>,
) -> ApiResult {
    let order_id = id.into_inner();
    let (test, result) = state.ehr.submit_lab_results(order_id, body.into_inner()).await?;

    let order = state.ehr.get_lab_order(order_id).await?;
    notify_user(
        &state,
        order.doctor_id,
        NewNotification::new(
            NotificationKind::LabResult,
            "Lab results ready",
            format!(
                "Results for {} ({}) on patient {} are ready for review.",
                test.name, order.order_id, order.patient_name
            ),
        )
        .link(format!("/laboratory/results/{}", result.id))
        .object("lab_result", result.id),
    )
    .await;
    Ok(HttpResponse::Ok().json(test))
}

// ===== Tests =====

pub async fn list_tests(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<LabTestFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_lab_tests(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn lab_test(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_lab_test(id.into_inner()).await?))
}

// ===== Results =====

pub async fn list_results(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<LabResultFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_lab_results(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn lab_result(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_lab_result(id.into_inner()).await?))
}

pub async fn verify_result(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    id: web::Path<i64>,
    body: web::Json<VerifyLabResult>,
) -> ApiResult {
    let result = state
        .ehr
        .verify_lab_result(id.into_inner(), body.into_inner(), user.id)
        .await?;

    audit(
        &state,
        NewActivity::new(AuditAction::Verify, MODULE, "lab_order", result.order_pk)
            .by(Some(user.id))
            .repr(format!("Lab Order {}", result.order_id))
            .describe(format!("Verified lab result {} for {}", result.id, result.patient_name))
            .client(&client),
    )
    .await;
    Ok(HttpResponse::Ok().json(result))
}
