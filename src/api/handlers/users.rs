use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::accounts::{NewUser, UserFilter, UserUpdate, UserView};
use crate::AppState;

pub async fn list(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<UserFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_users(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page.map(UserView::from)))
}

pub async fn create(state: web::Data<AppState>, user: AuthUser, body: web::Json<NewUser>) -> ApiResult {
    user.require_staff()?;
    let input = body.into_inner();
    input.validate()?;
    let created_user = state.ehr.create_user(input).await?;
    Ok(created(&UserView::from(created_user)))
}

pub async fn detail(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    let found = state.ehr.get_user(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserView::from(found)))
}

pub async fn update(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<UserUpdate>,
) -> ApiResult {
    user.require_staff()?;
    let update = body.into_inner();
    update.validate()?;
    let updated = state.ehr.update_user(id.into_inner(), update).await?;
    Ok(HttpResponse::Ok().json(UserView::from(updated)))
}

pub async fn delete(state: web::Data<AppState>, user: AuthUser, id: web::Path<i64>) -> ApiResult {
    user.require_staff()?;
    state.ehr.delete_user(id.into_inner()).await?;
    Ok(no_content())
}
