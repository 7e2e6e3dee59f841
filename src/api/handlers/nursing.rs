use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::nursing::{
    NewNursingOrder, NewProcedure, NursingOrderFilter, NursingOrderUpdate, ProcedureFilter, ProcedureUpdate,
};
use crate::AppState;

// ===== Orders =====

pub async fn list_orders(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<NursingOrderFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_nursing_orders(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_order(state: web::Data<AppState>, user: AuthUser, body: web::Json<NewNursingOrder>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_nursing_order(input, Some(user.id)).await?))
}

pub async fn order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_nursing_order(id.into_inner()).await?))
}

pub async fn update_order(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<NursingOrderUpdate>,
) -> ApiResult {
    let update = body.into_inner();
    update.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_nursing_order(id.into_inner(), update).await?))
}

pub async fn delete_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_nursing_order(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn start_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.start_nursing_order(id.into_inner()).await?))
}

pub async fn complete_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.complete_nursing_order(id.into_inner()).await?))
}

pub async fn cancel_order(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.cancel_nursing_order(id.into_inner()).await?))
}

// ===== Procedures =====

pub async fn list_procedures(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ProcedureFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_procedures(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// The caller is always recorded as the performer.
pub async fn record_procedure(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<NewProcedure>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.record_procedure(input, Some(user.id)).await?))
}

pub async fn procedure(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_procedure(id.into_inner()).await?))
}

pub async fn update_procedure(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ProcedureUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.update_procedure(id.into_inner(), body.into_inner()).await?))
}

pub async fn delete_procedure(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_procedure(id.into_inner()).await?;
    Ok(no_content())
}
