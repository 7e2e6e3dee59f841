//! Visits and vital sign readings.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::visit::{NewVisit, VisitFilter, VisitUpdate, VitalsFilter, VitalsInput};
use crate::AppState;

// ===== Visits =====

pub async fn list_visits(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<VisitFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_visits(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_visit(state: web::Data<AppState>, user: AuthUser, body: web::Json<NewVisit>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_visit(input, Some(user.id)).await?))
}

pub async fn visit(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_visit(id.into_inner()).await?))
}

pub async fn update_visit(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<VisitUpdate>,
) -> ApiResult {
    let update = body.into_inner();
    update.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_visit(id.into_inner(), update).await?))
}

pub async fn delete_visit(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_visit(id.into_inner()).await?;
    Ok(no_content())
}

// ===== Vitals =====

pub async fn list_vitals(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<VitalsFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_vitals(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn record_vitals(state: web::Data<AppState>, user: AuthUser, body: web::Json<VitalsInput>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.record_vitals(input, Some(user.id)).await?))
}

pub async fn vitals(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_vitals(id.into_inner()).await?))
}

pub async fn update_vitals(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<VitalsInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_vitals(id.into_inner(), input).await?))
}

pub async fn delete_vitals(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_vitals(id.into_inner()).await?;
    Ok(no_content())
}
