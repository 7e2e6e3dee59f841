//! Read access to the activity log.

use actix_web::{web, HttpResponse};

use super::{page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::ehr::AuditScope;
use crate::models::audit::{ActivityFilter, StatsQuery};
use crate::AppState;

fn scope(user: &AuthUser) -> AuditScope {
    if user.is_superuser {
        AuditScope::All
    } else {
        AuditScope::User(user.id)
    }
}

pub async fn list(
    state: web::Data<AppState>,
    user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ActivityFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_activity(scope(&user), &filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn stats(state: web::Data<AppState>, user: AuthUser, query: web::Query<StatsQuery>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.activity_stats(scope(&user), query.days).await?))
}
