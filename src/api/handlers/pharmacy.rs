//! Medications, stock, prescriptions and dispensing.

use actix_web::{web, HttpResponse};
use validator::Validate;

use super::{audit, created, no_content, notify_role, page_request, ApiResult};
use crate::api::middleware::{AuthUser, ClientInfo};
use crate::db::ListParams;
use crate::models::audit::{AuditAction, NewActivity};
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::pharmacy::{
    AlertQuery, DispenseFilter, DispenseRequest, InventoryFilter, InventoryInput, MedicationFilter, MedicationInput,
    NewPrescription, PrescriptionFilter, PrescriptionUpdate,
};
use crate::AppState;

const MODULE: &str = "pharmacy";
const PHARMACIST_ROLE: &str = "Pharmacist";

// ===== Medications =====

pub async fn list_medications(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<MedicationFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_medications(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_medication(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<MedicationInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_medication(input).await?))
}

pub async fn medication(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_medication(id.into_inner()).await?))
}

pub async fn update_medication(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<MedicationInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_medication(id.into_inner(), input).await?))
}

pub async fn delete_medication(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_medication(id.into_inner()).await?;
    Ok(no_content())
}

// ===== Inventory =====

pub async fn list_inventory(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<InventoryFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_inventory(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_inventory(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<InventoryInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(created(&state.ehr.create_inventory_item(input).await?))
}

pub async fn inventory_item(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_inventory_item(id.into_inner()).await?))
}

pub async fn update_inventory(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<InventoryInput>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    Ok(HttpResponse::Ok().json(state.ehr.update_inventory_item(id.into_inner(), input).await?))
}

pub async fn delete_inventory(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_inventory_item(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn inventory_alerts(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    query: web::Query<AlertQuery>,
) -> ApiResult {
    let page = state
        .ehr
        .inventory_alerts(query.kind, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn alert_summary(state: web::Data<AppState>, _user: AuthUser) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.inventory_alert_summary().await?))
}

// ===== Prescriptions =====

pub async fn list_prescriptions(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<PrescriptionFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_prescriptions(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// New prescriptions are announced to every pharmacist.
pub async fn create_prescription(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<NewPrescription>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    let prescription = state.ehr.create_prescription(input, Some(user.id)).await?;

    notify_role(
        &state,
        PHARMACIST_ROLE,
        NewNotification::new(
            NotificationKind::Prescription,
            "New prescription",
            format!(
                "Prescription {} for {} is waiting to be dispensed.",
                prescription.prescription_id, prescription.patient_name
            ),
        )
        .link(format!("/pharmacy/prescriptions/{}", prescription.id))
        .object("prescription", prescription.id),
    )
    .await;
    Ok(created(&prescription))
}

pub async fn prescription(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_prescription(id.into_inner()).await?))
}

pub async fn update_prescription(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<PrescriptionUpdate>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(
        state
            .ehr
            .update_prescription(id.into_inner(), body.into_inner())
            .await?,
    ))
}

pub async fn delete_prescription(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    state.ehr.delete_prescription(id.into_inner()).await?;
    Ok(no_content())
}

pub async fn cancel_prescription(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.cancel_prescription(id.into_inner()).await?))
}

pub async fn dispense(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    id: web::Path<i64>,
    body: web::Json<DispenseRequest>,
) -> ApiResult {
    let prescription_id = id.into_inner();
    let dispense = state
        .ehr
        .dispense(prescription_id, body.into_inner(), user.id)
        .await?;

    audit(
        &state,
        NewActivity::new(AuditAction::Update, MODULE, "prescription", prescription_id)
            .by(Some(user.id))
            .repr(format!("Dispense {}", dispense.dispense_id))
            .describe(format!(
                "Dispensed {} {} of {} to {}",
                dispense.quantity, dispense.unit, dispense.medication_name, dispense.patient_name
            ))
            .client(&client),
    )
    .await;
    Ok(HttpResponse::Ok().json(dispense))
}

// ===== Dispense history =====

pub async fn list_dispenses(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<DispenseFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_dispenses(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn dispense_record(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.get_dispense(id.into_inner()).await?))
}
