//! Appointment booking and doctors' weekly slots.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use validator::Validate;

use super::{created, no_content, notify_user, page_request, ApiResult};
use crate::api::middleware::AuthUser;
use crate::db::ListParams;
use crate::models::appointment::{
    Appointment, AppointmentFilter, AppointmentUpdate, NewAppointment, SlotFilter, SlotInput,
};
use crate::models::notification::{NewNotification, NotificationKind};
use crate::AppState;

fn appointment_note(appointment: &Appointment, title: &str, message: String) -> NewNotification {
    NewNotification::new(NotificationKind::Appointment, title, message)
        .link(format!("/appointments/{}", appointment.id))
        .object("appointment", appointment.id)
}

// ===== Appointments =====

pub async fn list_appointments(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<AppointmentFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_appointments(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Books the appointment and tells the assigned doctor.
pub async fn create_appointment(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<NewAppointment>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    let appointment = state.ehr.create_appointment(input, Some(user.id)).await?;

    let message = format!(
        "{} is booked for {} at {}.",
        appointment.patient_name,
        appointment.appointment_date,
        appointment.appointment_time.format("%H:%M")
    );
    notify_user(
        &state,
        appointment.doctor_id,
        appointment_note(&appointment, "Appointment Scheduled", message),
    )
    .await;
    Ok(created(&appointment))
}

pub async fn appointment(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_appointment(id.into_inner()).await?))
}

pub async fn update_appointment(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<AppointmentUpdate>,
) -> ApiResult {
    let update = body.into_inner();
    update.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_appointment(id.into_inner(), update).await?))
}

pub async fn delete_appointment(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_appointment(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn confirm(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.confirm_appointment(id.into_inner()).await?))
}

pub async fn cancel(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    let appointment = state.ehr.cancel_appointment(id.into_inner()).await?;
    let message = format!(
        "The appointment for {} on {} was cancelled.",
        appointment.patient_name, appointment.appointment_date
    );
    notify_user(
        &state,
        appointment.doctor_id,
        appointment_note(&appointment, "Appointment Cancelled", message),
    )
    .await;
    Ok(HttpResponse::Ok().json(appointment))
}

pub async fn upcoming(state: web::Data<AppState>, _user: AuthUser) -> ApiResult {
    let today = Utc::now().date_naive();
    Ok(HttpResponse::Ok().json(state.ehr.upcoming_appointments(today).await?))
}

pub async fn today(state: web::Data<AppState>, _user: AuthUser) -> ApiResult {
    let today = Utc::now().date_naive();
    Ok(HttpResponse::Ok().json(state.ehr.appointments_on(today).await?))
}

// ===== Slots =====

pub async fn list_slots(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<SlotFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_slots(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_slot(state: web::Data<AppState>, _user: AuthUser, body: web::Json<SlotInput>) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_slot(input).await?))
}

pub async fn slot(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_slot(id.into_inner()).await?))
}

pub async fn update_slot(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<SlotInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_slot(id.into_inner(), input).await?))
}

pub async fn delete_slot(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_slot(id.into_inner()).await?;
    Ok(no_content())
}
