//! Patient registry and its per-patient sub-resources.

use actix_web::{web, HttpResponse};
use serde_json::Value;
use validator::Validate;

use super::{audit, created, no_content, page_request, ApiResult};
use crate::api::middleware::{AuthUser, ClientInfo};
use crate::db::ListParams;
use crate::models::audit::{AuditAction, NewActivity};
use crate::models::patient::{MedicalHistoryUpdate, NewPatient, Patient, PatientFilter, PatientUpdate, PatientView};
use crate::AppState;

const MODULE: &str = "patients";

fn patient_activity(action: AuditAction, patient: &Patient, user: &AuthUser, client: &ClientInfo) -> NewActivity {
    NewActivity::new(action, MODULE, "patient", patient.id)
        .by(Some(user.id))
        .repr(patient.full_name())
        .client(client)
}

fn snapshot(patient: &Patient) -> Value {
    serde_json::to_value(patient).unwrap_or_default()
}

pub async fn list(
    state: web::Data<AppState>,
    _user: AuthUser,
    params: web::Query<ListParams>,
    filter: web::Query<PatientFilter>,
) -> ApiResult {
    let page = state
        .ehr
        .list_patients(&filter, &params, page_request(&state, &params))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    body: web::Json<NewPatient>,
) -> ApiResult {
    let input = body.into_inner();
    input.validate()?;
    let patient = state.ehr.create_patient(input, Some(user.id)).await?;

    audit(
        &state,
        patient_activity(AuditAction::Create, &patient, &user, &client)
            .describe(format!("Created patient {}", patient.patient_id))
            .values(Value::Object(Default::default()), snapshot(&patient)),
    )
    .await;
    Ok(created(&PatientView::from(patient)))
}

pub async fn detail(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    let patient = state.ehr.get_patient(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PatientView::from(patient)))
}

pub async fn update(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    id: web::Path<i64>,
    body: web::Json<PatientUpdate>,
) -> ApiResult {
    let update = body.into_inner();
    update.validate()?;
    let (before, after) = state.ehr.update_patient(id.into_inner(), update).await?;

    audit(
        &state,
        patient_activity(AuditAction::Update, &after, &user, &client)
            .describe(format!("Updated patient {}", after.patient_id))
            .values(snapshot(&before), snapshot(&after)),
    )
    .await;
    Ok(HttpResponse::Ok().json(PatientView::from(after)))
}

/// Soft delete; the row stays with `is_active = false`.
pub async fn delete(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    id: web::Path<i64>,
) -> ApiResult {
    let patient = state.ehr.deactivate_patient(id.into_inner()).await?;
    audit(
        &state,
        patient_activity(AuditAction::Delete, &patient, &user, &client)
            .describe(format!("Deactivated patient {}", patient.patient_id)),
    )
    .await;
    Ok(no_content())
}

pub async fn visits(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.patient_visits(id.into_inner()).await?))
}

pub async fn vitals(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.patient_vitals(id.into_inner()).await?))
}

pub async fn dependents(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.patient_dependents(id.into_inner()).await?))
}

pub async fn history(state: web::Data<AppState>, _user: AuthUser, id: web::Path<i64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.medical_history(id.into_inner()).await?))
}

pub async fn update_history(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<i64>,
    body: web::Json<MedicalHistoryUpdate>,
) -> ApiResult {
    let history = state
        .ehr
        .update_medical_history(id.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(history))
}
