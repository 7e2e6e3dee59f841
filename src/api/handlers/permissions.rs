//! Roles and role assignments. Every endpoint here is staff-only.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::permissions::{RoleFilter, RoleInput, RoleUpdate, UserRoleFilter, UserRoleInput};
use crate::AppState;

// ===== Roles =====

pub async fn list_roles(
    state: web::Data<AppState>,
    user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<RoleFilter>,
) -> ApiResult {
    user.require_staff()?;
    let page = state
        .ehr
        .list_roles(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_role(state: web::Data<AppState>, user: AuthUser, body: web::Json<RoleInput>) -> ApiResult {
    user.require_staff()?;
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_role(input).await?))
}

pub async fn role(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    Ok(HttpResponse::Ok().json(state.ehr.get_role(id.into_inner()).await?))
}

pub async fn update_role(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<RoleUpdate>,
) -> ApiResult {
    user.require_staff()?;
    let update = body.into_inner();
    update.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_role(id.into_inner(), update).await?))
}

pub async fn delete_role(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    state.ehr.delete_role(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn role_users(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    Ok(HttpResponse::Ok().json(state.ehr.role_users(id.into_inner()).await?))
}

// ===== Assignments =====

pub async fn list_user_roles(
    state: web::Data<AppState>,
    user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<UserRoleFilter>,
) -> ApiResult {
    user.require_staff()?;
    let page = state
        .ehr
        .list_user_roles(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn assign_role(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<UserRoleInput>,
) -> ApiResult {
    user.require_staff()?;
    Ok(created(&state.ehr.assign_role(body.into_inner(), user.id).await?))
}

pub async fn user_role(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    Ok(HttpResponse::Ok().json(state.ehr.get_user_role(id.into_inner()).await?))
}

pub async fn revoke_role(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    state.ehr.revoke_role(id.into_inner()).await?;
    Ok(no_content())
}
