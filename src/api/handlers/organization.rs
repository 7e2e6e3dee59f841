//! Clinics, departments and rooms.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::organization::{ClinicFilter, ClinicInput, DepartmentFilter, DepartmentInput, RoomFilter, RoomInput};
use crate::AppState;

// ===== Clinics =====

pub async fn list_clinics(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ClinicFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_clinics(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_clinic(state: web::Data<AppState>, _user: AuthUser, body: web::Json<ClinicInput>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_clinic(input).await?))
}

pub async fn clinic(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_clinic(id.into_inner()).await?))
}

pub async fn update_clinic(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ClinicInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_clinic(id.into_inner(), input).await?))
}

pub async fn delete_clinic(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_clinic(id.into_inner()).await?;
    Ok(no_content())
}

// ===== Departments =====

pub async fn list_departments(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<DepartmentFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_departments(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_department(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<DepartmentInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_department(input).await?))
}

pub async fn department(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_department(id.into_inner()).await?))
}

pub async fn update_department(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<DepartmentInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_department(id.into_inner(), input).await?))
}

pub async fn delete_department(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_department(id.into_inner()).await?;
    Ok(no_content())
}

// ===== Rooms =====

pub async fn list_rooms(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<RoomFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_rooms(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_room(state: web::Data<AppState>, _user: AuthUser, body: web::Json<RoomInput>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_room(input).await?))
}

pub async fn room(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_room(id.into_inner()).await?))
}

pub async fn update_room(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<RoomInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_room(id.into_inner(), input).await?))
}

pub async fn delete_room(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_room(id.into_inner()).await?;
    Ok(no_content())
}
