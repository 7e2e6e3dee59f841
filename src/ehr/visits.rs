use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::ids::date_scoped;
use super::{allocate_unique, patient_name_sql, required, user_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::organization::normalize_clinic_name;
use crate::models::visit::{
    compute_bmi, NewVisit, Visit, VisitFilter, VisitUpdate, VitalReading, VitalsFilter, VitalsInput,
};

const VISIT_ID_ATTEMPTS: u32 = 1000;

const VISIT_ORDERING: Ordering = Ordering {
    fields: &[("date", "v.date"), ("time", "v.time"), ("created_at", "v.created_at")],
    default: "-date,-time",
    tiebreak: "v.id",
};

const VITALS_ORDERING: Ordering = Ordering {
    fields: &[("recorded_at", "vr.recorded_at")],
    default: "-recorded_at",
    tiebreak: "vr.id",
};

fn visit_columns() -> String {
    format!(
        "v.*, {} AS patient_name, CASE WHEN d.id IS NULL THEN NULL ELSE {} END AS doctor_name",
        patient_name_sql("p"),
        user_name_sql("d")
    )
}

const VISIT_FROM: &str = "FROM visits v \
     JOIN patients p ON p.id = v.patient_id \
     LEFT JOIN users d ON d.id = v.doctor_id WHERE 1 = 1";

fn vitals_columns() -> String {
    format!(
        "vr.*, {} AS patient_name, CASE WHEN u.id IS NULL THEN NULL ELSE {} END AS recorded_by_name",
        patient_name_sql("p"),
        user_name_sql("u")
    )
}

const VITALS_FROM: &str = "FROM vital_readings vr \
     JOIN patients p ON p.id = vr.patient_id \
     LEFT JOIN users u ON u.id = vr.recorded_by WHERE 1 = 1";

impl VisitFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND v.patient_id = ").push_bind(patient);
        }
        if let Some(status) = self.status {
            qb.push(" AND v.status = ").push_bind(status);
        }
        if let Some(visit_type) = self.visit_type {
            qb.push(" AND v.visit_type = ").push_bind(visit_type);
        }
        if let Some(clinic) = &self.clinic {
            qb.push(" AND v.clinic = ").push_bind(clinic.clone());
        }
        push_search(qb, search, &["v.visit_id", "v.chief_complaint", "v.clinical_notes"]);
    }
}

impl VitalsFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(patient) = self.patient {
            qb.push(" AND vr.patient_id = ").push_bind(patient);
        }
        if let Some(visit) = self.visit {
            qb.push(" AND vr.visit_id = ").push_bind(visit);
        }
    }
}

impl EhrDatabase {
    // ===== Visits =====

    #[instrument(skip(self, input), fields(patient_id = input.patient_id))]
    pub async fn create_visit(&self, input: NewVisit, created_by: Option<i64>) -> StoreResult<Visit> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(doctor) = input.doctor_id {
            self.ensure_exists("users", doctor, "doctor").await?;
        }
        let clinic = if input.clinic.trim().is_empty() {
            String::new()
        } else {
            normalize_clinic_name(Some(&input.clinic))
        };

        let mut tx = self.pool.begin().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits WHERE date = ?")
            .bind(input.date)
            .fetch_one(&mut *tx)
            .await?;
        let visit_id = allocate_unique(&mut *tx, "visits", "visit_id", "visit_id", VISIT_ID_ATTEMPTS, |n| {
            date_scoped("VIS", input.date, count + 1 + i64::from(n), 4)
        })
        .await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO visits (
                visit_id, patient_id, visit_type, status, date, time, clinic, location, doctor_id,
                chief_complaint, clinical_notes, created_at, updated_at, created_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&visit_id)
        .bind(input.patient_id)
        .bind(input.visit_type)
        .bind(input.status)
        .bind(input.date)
        .bind(input.time)
        .bind(&clinic)
        .bind(&input.location)
        .bind(input.doctor_id)
        .bind(&input.chief_complaint)
        .bind(&input.clinical_notes)
        .bind(now)
        .bind(now)
        .bind(created_by)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, visit_id = %visit_id, "Visit created");
        self.get_visit(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_visit(&self, id: i64) -> StoreResult<Visit> {
        sqlx::query_as::<_, Visit>(&format!("SELECT {} {VISIT_FROM} AND v.id = ?", visit_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Visit"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_visits(
        &self,
        filter: &VisitFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Visit>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &visit_columns(),
            VISIT_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &VISIT_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    pub(crate) async fn visits_for_patient(&self, patient_id: i64) -> StoreResult<Vec<Visit>> {
        Ok(sqlx::query_as::<_, Visit>(&format!(
            "SELECT {} {VISIT_FROM} AND v.patient_id = ?{}",
            visit_columns(),
            VISIT_ORDERING.clause(None)
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, update))]
    pub async fn update_visit(&self, id: i64, update: VisitUpdate) -> StoreResult<Visit> {
        let mut visit = self.get_visit(id).await?;
        if let Some(v) = update.visit_type {
            visit.visit_type = v;
        }
        if let Some(v) = update.status {
            visit.status = v;
        }
        if let Some(v) = update.date {
            visit.date = v;
        }
        if let Some(v) = update.time {
            visit.time = v;
        }
        if let Some(v) = update.clinic {
            visit.clinic = if v.trim().is_empty() { String::new() } else { normalize_clinic_name(Some(&v)) };
        }
        if let Some(v) = update.location {
            visit.location = Some(v);
        }
        if let Some(doctor) = update.doctor_id {
            if let Some(doctor) = doctor {
                self.ensure_exists("users", doctor, "doctor").await?;
            }
            visit.doctor_id = doctor;
        }
        if let Some(v) = update.chief_complaint {
            visit.chief_complaint = v;
        }
        if let Some(v) = update.clinical_notes {
            visit.clinical_notes = v;
        }

        sqlx::query(
            "UPDATE visits SET visit_type = ?, status = ?, date = ?, time = ?, clinic = ?, location = ?,
                doctor_id = ?, chief_complaint = ?, clinical_notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(visit.visit_type)
        .bind(visit.status)
        .bind(visit.date)
        .bind(visit.time)
        .bind(&visit.clinic)
        .bind(&visit.location)
        .bind(visit.doctor_id)
        .bind(&visit.chief_complaint)
        .bind(&visit.clinical_notes)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(id, visit_id = %visit.visit_id, status = ?visit.status, "Visit updated");
        self.get_visit(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_visit(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM visits WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Visit"));
        }
        Ok(())
    }

    // ===== Vitals =====

    /// The patient defaults to the visit's patient when only a visit is given.
    #[instrument(skip(self, input))]
    pub async fn record_vitals(&self, input: VitalsInput, recorded_by: Option<i64>) -> StoreResult<VitalReading> {
        let patient_id = match (input.patient_id, input.visit_id) {
            (Some(patient), _) => patient,
            (None, Some(visit)) => match self.get_visit(visit).await {
                Ok(v) => v.patient_id,
                Err(StoreError::NotFound(_)) => {
                    return Err(StoreError::field("visit", format!("Invalid pk \"{visit}\" - object does not exist.")))
                }
                Err(e) => return Err(e),
            },
            (None, None) => required(None, "patient")?,
        };
        self.ensure_exists("patients", patient_id, "patient").await?;
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let bmi = compute_bmi(input.weight, input.height).map_err(|e| StoreError::field(e.field(), e.to_string()))?;

        let id = sqlx::query(
            "INSERT INTO vital_readings (
                visit_id, patient_id, temperature, blood_pressure_systolic, blood_pressure_diastolic,
                heart_rate, respiratory_rate, oxygen_saturation, weight, height, bmi, notes,
                recorded_at, recorded_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(input.visit_id)
        .bind(patient_id)
        .bind(input.temperature)
        .bind(input.blood_pressure_systolic)
        .bind(input.blood_pressure_diastolic)
        .bind(input.heart_rate)
        .bind(input.respiratory_rate)
        .bind(input.oxygen_saturation)
        .bind(input.weight)
        .bind(input.height)
        .bind(bmi)
        .bind(input.notes.unwrap_or_default())
        .bind(Utc::now())
        .bind(recorded_by)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, patient_id, "Vitals recorded");
        self.get_vitals(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_vitals(&self, id: i64) -> StoreResult<VitalReading> {
        sqlx::query_as::<_, VitalReading>(&format!("SELECT {} {VITALS_FROM} AND vr.id = ?", vitals_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Vital reading"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_vitals(
        &self,
        filter: &VitalsFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<VitalReading>> {
        self.fetch_page(
            &vitals_columns(),
            VITALS_FROM,
            |qb| filter.push(qb),
            &VITALS_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    pub(crate) async fn vitals_for_patient(&self, patient_id: i64) -> StoreResult<Vec<VitalReading>> {
        Ok(sqlx::query_as::<_, VitalReading>(&format!(
            "SELECT {} {VITALS_FROM} AND vr.patient_id = ?{}",
            vitals_columns(),
            VITALS_ORDERING.clause(None)
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Measurements present in `input` replace the stored ones; BMI is recomputed.
    #[instrument(skip(self, input))]
    pub async fn update_vitals(&self, id: i64, input: VitalsInput) -> StoreResult<VitalReading> {
        let mut vitals = self.get_vitals(id).await?;
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
            vitals.visit_id = Some(visit);
        }
        if let Some(patient) = input.patient_id {
            self.ensure_exists("patients", patient, "patient").await?;
            vitals.patient_id = patient;
        }
        let measures = [
            (input.temperature, &mut vitals.temperature),
            (input.oxygen_saturation, &mut vitals.oxygen_saturation),
            (input.weight, &mut vitals.weight),
            (input.height, &mut vitals.height),
        ];
        for (value, slot) in measures {
            if value.is_some() {
                *slot = value;
            }
        }
        let counts = [
            (input.blood_pressure_systolic, &mut vitals.blood_pressure_systolic),
            (input.blood_pressure_diastolic, &mut vitals.blood_pressure_diastolic),
            (input.heart_rate, &mut vitals.heart_rate),
            (input.respiratory_rate, &mut vitals.respiratory_rate),
        ];
        for (value, slot) in counts {
            if value.is_some() {
                *slot = value;
            }
        }
        if let Some(notes) = input.notes {
            vitals.notes = notes;
        }
        vitals.bmi = compute_bmi(vitals.weight, vitals.height).map_err(|e| StoreError::field(e.field(), e.to_string()))?;

        sqlx::query(
            "UPDATE vital_readings SET visit_id = ?, patient_id = ?, temperature = ?,
                blood_pressure_systolic = ?, blood_pressure_diastolic = ?, heart_rate = ?,
                respiratory_rate = ?, oxygen_saturation = ?, weight = ?, height = ?, bmi = ?, notes = ?
             WHERE id = ?",
        )
        .bind(vitals.visit_id)
        .bind(vitals.patient_id)
        .bind(vitals.temperature)
        .bind(vitals.blood_pressure_systolic)
        .bind(vitals.blood_pressure_diastolic)
        .bind(vitals.heart_rate)
        .bind(vitals.respiratory_rate)
        .bind(vitals.oxygen_saturation)
        .bind(vitals.weight)
        .bind(vitals.height)
        .bind(vitals.bmi)
        .bind(&vitals.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_vitals(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_vitals(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM vital_readings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Vital reading"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{NaiveDate, NaiveTime};

    use crate::models::visit::{NewVisit, VisitStatus, VisitType};

    pub fn new_visit(patient_id: i64, visit_type: VisitType) -> NewVisit {
        NewVisit {
            patient_id,
            visit_type,
            status: VisitStatus::Scheduled,
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            clinic: String::new(),
            location: None,
            doctor_id: None,
            chief_complaint: "Headache".into(),
            clinical_notes: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::new_visit;
    use super::*;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;
    use crate::models::visit::VisitType;

    #[actix_web::test]
    async fn visit_ids_are_sequenced_per_day() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("V1"), None).await.unwrap();

        let mut input = new_visit(patient.id, VisitType::Consultation);
        input.clinic = "ophthalmology".into();
        let first = store.create_visit(input, None).await.unwrap();
        let second = store.create_visit(new_visit(patient.id, VisitType::Emergency), None).await.unwrap();

        assert_eq!(first.visit_id, "VIS-20250314-0001");
        assert_eq!(second.visit_id, "VIS-20250314-0002");
        assert_eq!(first.clinic, "Eye Clinic");
        assert_eq!(first.patient_name, patient.full_name());

        let listed = store.patient_visits(patient.id).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[actix_web::test]
    async fn visit_for_missing_patient_is_a_field_error() {
        let store = testing::store().await;
        let result = store.create_visit(new_visit(404, VisitType::Routine), None).await;
        assert!(matches!(result, Err(StoreError::Validation(e)) if e.contains_key("patient")));
    }

    #[actix_web::test]
    async fn vitals_compute_bmi_and_reject_implausible_height() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("V2"), None).await.unwrap();
        let visit = store.create_visit(new_visit(patient.id, VisitType::Routine), None).await.unwrap();

        let reading = store
            .record_vitals(
                VitalsInput { visit_id: Some(visit.id), weight: Some(70.0), height: Some(175.0), ..Default::default() },
                None,
            )
            .await
            .unwrap();
        assert_eq!(reading.patient_id, patient.id);
        assert_eq!(reading.bmi, Some(22.86));

        let bad = store
            .update_vitals(reading.id, VitalsInput { height: Some(10.0), ..Default::default() })
            .await;
        assert!(matches!(bad, Err(StoreError::Validation(e)) if e.contains_key("height")));
    }
}
