//! Consultation rooms, their waiting queues, sessions and referrals.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{created, no_content, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::consultation::{
    ConsultationRoomFilter, ConsultationRoomInput, ConsultationSessionFilter, ConsultationSessionUpdate,
    NewConsultationSession, NewQueueEntry, QueueEntryUpdate, QueueFilter, ReferralFilter, ReferralInput,
    ReferralStatusUpdate,
};
use crate::AppState;

// ===== Rooms =====

pub async fn list_rooms(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ConsultationRoomFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_consultation_rooms(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_room(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<ConsultationRoomInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_consultation_room(input).await?))
}

pub async fn room(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_consultation_room(id.into_inner()).await?))
}

pub async fn update_room(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ConsultationRoomInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_consultation_room(id.into_inner(), input).await?))
}

pub async fn delete_room(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_consultation_room(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn room_queue(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.room_queue(id.into_inner()).await?))
}

pub async fn call_next(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.call_next(id.into_inner()).await?))
}

// ===== Queue =====

pub async fn list_queue(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<QueueFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_queue(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn enqueue(state: web::Data<AppState>, _user: AuthUser, body: web::Json<NewQueueEntry>) -> ApiResult {
    Ok(created(&state.ehr.enqueue(body.into_inner()).await?))
}

pub async fn queue_entry(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_queue_entry(id.into_inner()).await?))
}

pub async fn update_queue_entry(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<QueueEntryUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(
        state
            .ehr
            .update_queue_entry(id.into_inner(), body.into_inner())
            .await?,
    ))
}

pub async fn delete_queue_entry(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_queue_entry(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn call_queue_entry(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.call_queue_entry(id.into_inner()).await?))
}

// ===== Sessions =====

pub async fn list_sessions(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ConsultationSessionFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_consultation_sessions(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_session(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<NewConsultationSession>,
) -> ApiResult {
    let session = state
        .ehr
        .create_consultation_session(body.into_inner(), Some(user.id))
        .await?;
    Ok(created(&session))
}

pub async fn session(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_consultation_session(id.into_inner()).await?))
}

pub async fn update_session(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ConsultationSessionUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(
        state
            .ehr
            .update_consultation_session(id.into_inner(), body.into_inner())
            .await?,
    ))
}

pub async fn delete_session(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_consultation_session(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn end_session(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.end_consultation_session(id.into_inner()).await?))
}

// ===== Referrals =====

pub async fn list_referrals(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<ReferralFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_referrals(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_referral(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<ReferralInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_referral(input, Some(user.id)).await?))
}

pub async fn referral(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_referral(id.into_inner()).await?))
}

pub async fn update_referral(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ReferralInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_referral(id.into_inner(), input).await?))
}

pub async fn delete_referral(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_referral(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn update_referral_status(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<ReferralStatusUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(
        state
            .ehr
            .update_referral_status(id.into_inner(), body.into_inner())
            .await?,
    ))
}
