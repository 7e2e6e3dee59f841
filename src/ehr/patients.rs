use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use super::ids::{sequenced, staff_patient_id};
use super::{allocate_unique, patient_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::patient::{
    MedicalHistory, MedicalHistoryUpdate, NewPatient, Patient, PatientCategory, PatientFilter, PatientSummary,
    PatientUpdate,
};
use crate::models::visit::{Visit, VitalReading};

const PATIENT_ID_ATTEMPTS: u32 = 100;

const PATIENT_ORDERING: Ordering = Ordering {
    fields: &[
        ("created_at", "created_at"),
        ("surname", "surname"),
        ("first_name", "first_name"),
    ],
    default: "-created_at",
    tiebreak: "id",
};

fn cache_key(id: i64) -> String {
    format!("patient_{id}")
}

impl PatientFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(category) = self.category {
            qb.push(" AND category = ").push_bind(category);
        }
        if let Some(gender) = self.gender {
            qb.push(" AND gender = ").push_bind(gender);
        }
        if let Some(group) = &self.blood_group {
            qb.push(" AND blood_group = ").push_bind(group.clone());
        }
        match self.is_active {
            Some(active) => {
                qb.push(" AND is_active = ").push_bind(active);
            }
            None if !self.include_inactive => {
                qb.push(" AND is_active = 1");
            }
            None => {}
        }
        push_search(
            qb,
            search,
            &[
                "patient_id",
                "surname",
                "first_name",
                "middle_name",
                "personal_number",
                "phone",
                "email",
            ],
        );
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Picks a free patient identifier for `input`; `principal` is the resolved
/// principal of a dependent.
async fn allocate_patient_id(
    conn: &mut SqliteConnection,
    input: &NewPatient,
    principal: Option<&Patient>,
) -> StoreResult<String> {
    match input.category {
        PatientCategory::Employee | PatientCategory::Retiree => {
            let (prefix, label) = match input.category {
                PatientCategory::Employee => ("E", "Employee"),
                _ => ("R", "Retiree"),
            };
            let pn = non_blank(input.personal_number.as_deref()).ok_or_else(|| {
                StoreError::field(
                    "personal_number",
                    format!("Personal number is required for {label} patients"),
                )
            })?;
            allocate_unique(conn, "patients", "patient_id", "patient_id", PATIENT_ID_ATTEMPTS, |n| {
                staff_patient_id(prefix, pn, n)
            })
            .await
        }
        PatientCategory::Nonnpa => {
            let kind = non_blank(input.nonnpa_type.as_deref()).ok_or_else(|| {
                StoreError::field("nonnpa_type", "Non-NPA type is required for Non-NPA patients")
            })?;
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM patients WHERE category = ? AND LOWER(TRIM(nonnpa_type)) = LOWER(?)",
            )
            .bind(PatientCategory::Nonnpa)
            .bind(kind)
            .fetch_one(&mut *conn)
            .await?;
            let base = format!("NN-{}", kind.to_uppercase());
            allocate_unique(conn, "patients", "patient_id", "patient_id", PATIENT_ID_ATTEMPTS, |n| {
                sequenced(&base, count + 1 + i64::from(n), 2)
            })
            .await
        }
        PatientCategory::Dependent => {
            let principal = principal.ok_or_else(|| {
                StoreError::field("principal_staff", "Principal staff is required for Dependent patients")
            })?;
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM patients WHERE category = ? AND principal_staff_id = ?",
            )
            .bind(PatientCategory::Dependent)
            .bind(principal.id)
            .fetch_one(&mut *conn)
            .await?;
            allocate_unique(conn, "patients", "patient_id", "patient_id", PATIENT_ID_ATTEMPTS, |n| {
                sequenced(&principal.patient_id, count + 1 + i64::from(n), 2)
            })
            .await
        }
    }
}

impl EhrDatabase {
    // ===== Patients =====

    /// Resolves `principal_staff`; only dependents require one.
    async fn principal_for(&self, principal_id: Option<i64>, patient_id: Option<i64>) -> StoreResult<Option<Patient>> {
        let Some(id) = principal_id else {
            return Ok(None);
        };
        if Some(id) == patient_id {
            return Err(StoreError::field("principal_staff", "A patient cannot be their own principal staff."));
        }
        let principal = match self.get_patient(id).await {
            Ok(p) => p,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::field(
                    "principal_staff",
                    format!("Invalid pk \"{id}\" - object does not exist."),
                ))
            }
            Err(e) => return Err(e),
        };
        if !matches!(principal.category, PatientCategory::Employee | PatientCategory::Retiree) {
            return Err(StoreError::field(
                "principal_staff",
                "Principal staff must be an Employee or Retiree patient.",
            ));
        }
        Ok(Some(principal))
    }

    #[instrument(skip(self, input), fields(category = ?input.category))]
    pub async fn create_patient(&self, input: NewPatient, created_by: Option<i64>) -> StoreResult<Patient> {
        let principal = self.principal_for(input.principal_staff_id, None).await?;

        let mut tx = self.pool.begin().await?;
        let patient_id = allocate_patient_id(&mut *tx, &input, principal.as_ref()).await?;
        let now = Utc::now();

        let id = sqlx::query(
            "INSERT INTO patients (
                patient_id, category, title, surname, first_name, middle_name, gender, date_of_birth,
                marital_status, religion, tribe, occupation, personal_number, employee_type, division,
                location, nonnpa_type, dependent_type, principal_staff_id, email, phone,
                state_of_residence, residential_address, state_of_origin, lga, permanent_address,
                blood_group, genotype, allergies, nok_surname, nok_first_name, nok_middle_name,
                nok_relationship, nok_address, nok_phone, created_at, updated_at, created_by, is_active
            ) VALUES (
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )",
        )
        .bind(&patient_id)
        .bind(input.category)
        .bind(&input.title)
        .bind(&input.surname)
        .bind(&input.first_name)
        .bind(&input.middle_name)
        .bind(input.gender)
        .bind(input.date_of_birth)
        .bind(&input.marital_status)
        .bind(&input.religion)
        .bind(&input.tribe)
        .bind(&input.occupation)
        .bind(&input.personal_number)
        .bind(&input.employee_type)
        .bind(&input.division)
        .bind(&input.location)
        .bind(&input.nonnpa_type)
        .bind(&input.dependent_type)
        .bind(principal.as_ref().map(|p| p.id))
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.state_of_residence)
        .bind(&input.residential_address)
        .bind(&input.state_of_origin)
        .bind(&input.lga)
        .bind(&input.permanent_address)
        .bind(&input.blood_group)
        .bind(&input.genotype)
        .bind(&input.allergies)
        .bind(&input.nok_surname)
        .bind(&input.nok_first_name)
        .bind(&input.nok_middle_name)
        .bind(&input.nok_relationship)
        .bind(&input.nok_address)
        .bind(&input.nok_phone)
        .bind(now)
        .bind(now)
        .bind(created_by)
        .bind(input.is_active)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, patient_id = %patient_id, "Patient registered");
        self.get_patient(id).await
    }

    /// Served from the in-process cache when present.
    #[instrument(skip(self))]
    pub async fn get_patient(&self, id: i64) -> StoreResult<Patient> {
        let key = cache_key(id);
        if let Some(patient) = self.cache_get::<Patient>(&key) {
            return Ok(patient);
        }

        let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Patient"))?;
        self.cache_put(key, &patient);
        Ok(patient)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_patients(
        &self,
        filter: &PatientFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<PatientSummary>> {
        let search = params.search_term().map(str::to_string);
        let page: Page<Patient> = self
            .fetch_page(
                "*",
                "FROM patients WHERE 1 = 1",
                |qb| filter.push(qb, search.as_deref()),
                &PATIENT_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;
        Ok(page.map(PatientSummary::from))
    }

    /// Returns the stored row before and after the change.
    #[instrument(skip(self, update))]
    pub async fn update_patient(&self, id: i64, update: PatientUpdate) -> StoreResult<(Patient, Patient)> {
        let before = self.get_patient(id).await?;
        let mut patient = before.clone();
        update.apply(&mut patient);
        if patient.principal_staff_id != before.principal_staff_id {
            self.principal_for(patient.principal_staff_id, Some(id)).await?;
        }

        sqlx::query(
            "UPDATE patients SET
                category = ?, title = ?, surname = ?, first_name = ?, middle_name = ?, gender = ?,
                date_of_birth = ?, marital_status = ?, religion = ?, tribe = ?, occupation = ?,
                personal_number = ?, employee_type = ?, division = ?, location = ?, nonnpa_type = ?,
                dependent_type = ?, principal_staff_id = ?, email = ?, phone = ?, state_of_residence = ?,
                residential_address = ?, state_of_origin = ?, lga = ?, permanent_address = ?,
                blood_group = ?, genotype = ?, allergies = ?, nok_surname = ?, nok_first_name = ?,
                nok_middle_name = ?, nok_relationship = ?, nok_address = ?, nok_phone = ?,
                is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(patient.category)
        .bind(&patient.title)
        .bind(&patient.surname)
        .bind(&patient.first_name)
        .bind(&patient.middle_name)
        .bind(patient.gender)
        .bind(patient.date_of_birth)
        .bind(&patient.marital_status)
        .bind(&patient.religion)
        .bind(&patient.tribe)
        .bind(&patient.occupation)
        .bind(&patient.personal_number)
        .bind(&patient.employee_type)
        .bind(&patient.division)
        .bind(&patient.location)
        .bind(&patient.nonnpa_type)
        .bind(&patient.dependent_type)
        .bind(patient.principal_staff_id)
        .bind(&patient.email)
        .bind(&patient.phone)
        .bind(&patient.state_of_residence)
        .bind(&patient.residential_address)
        .bind(&patient.state_of_origin)
        .bind(&patient.lga)
        .bind(&patient.permanent_address)
        .bind(&patient.blood_group)
        .bind(&patient.genotype)
        .bind(&patient.allergies)
        .bind(&patient.nok_surname)
        .bind(&patient.nok_first_name)
        .bind(&patient.nok_middle_name)
        .bind(&patient.nok_relationship)
        .bind(&patient.nok_address)
        .bind(&patient.nok_phone)
        .bind(patient.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.cache_invalidate(&cache_key(id));
        info!(id, patient_id = %before.patient_id, "Patient updated");
        Ok((before, self.get_patient(id).await?))
    }

    /// Soft delete.
    #[instrument(skip(self))]
    pub async fn deactivate_patient(&self, id: i64) -> StoreResult<Patient> {
        let patient = self.get_patient(id).await?;
        sqlx::query("UPDATE patients SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.cache_invalidate(&cache_key(id));
        warn!(id, patient_id = %patient.patient_id, "Patient deactivated");
        Ok(patient)
    }

    #[instrument(skip(self))]
    pub async fn patient_dependents(&self, id: i64) -> StoreResult<Vec<PatientSummary>> {
        self.get_patient(id).await?;
        let rows = sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE principal_staff_id = ? AND category = ? ORDER BY patient_id",
        )
        .bind(id)
        .bind(PatientCategory::Dependent)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PatientSummary::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn patient_visits(&self, id: i64) -> StoreResult<Vec<Visit>> {
        self.get_patient(id).await?;
        self.visits_for_patient(id).await
    }

    #[instrument(skip(self))]
    pub async fn patient_vitals(&self, id: i64) -> StoreResult<Vec<VitalReading>> {
        self.get_patient(id).await?;
        self.vitals_for_patient(id).await
    }

    // ===== Medical history =====

    async fn fetch_medical_history(&self, patient_id: i64) -> StoreResult<MedicalHistory> {
        Ok(sqlx::query_as::<_, MedicalHistory>(&format!(
            "SELECT m.*, {} AS patient_name FROM medical_history m
             JOIN patients p ON p.id = m.patient_id WHERE m.patient_id = ?",
            patient_name_sql("p")
        ))
        .bind(patient_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Created empty on first access.
    #[instrument(skip(self))]
    pub async fn medical_history(&self, patient_id: i64) -> StoreResult<MedicalHistory> {
        self.get_patient(patient_id).await?;
        sqlx::query(
            "INSERT INTO medical_history (patient_id, updated_at) VALUES (?, ?)
             ON CONFLICT (patient_id) DO NOTHING",
        )
        .bind(patient_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        self.fetch_medical_history(patient_id).await
    }

    #[instrument(skip(self, update))]
    pub async fn update_medical_history(
        &self,
        patient_id: i64,
        update: MedicalHistoryUpdate,
        updated_by: i64,
    ) -> StoreResult<MedicalHistory> {
        let mut history = self.medical_history(patient_id).await?;
        update.apply(&mut history);

        sqlx::query(
            "UPDATE medical_history SET allergies = ?, diagnoses = ?, current_medications = ?,
                surgical_history = ?, family_history = ?, social_history = ?, updated_at = ?, updated_by = ?
             WHERE patient_id = ?",
        )
        .bind(Json(&history.allergies.0))
        .bind(Json(&history.diagnoses.0))
        .bind(Json(&history.current_medications.0))
        .bind(Json(&history.surgical_history.0))
        .bind(Json(&history.family_history.0))
        .bind(Json(&history.social_history.0))
        .bind(Utc::now())
        .bind(updated_by)
        .bind(patient_id)
        .execute(&self.pool)
        .await?;

        info!(patient_id, "Medical history updated");
        self.fetch_medical_history(patient_id).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;
    use fake::faker::name::en::{FirstName, LastName};
    use fake::Fake;

    use crate::models::patient::{Gender, NewPatient, PatientCategory};

    pub fn new_patient(category: PatientCategory) -> NewPatient {
        NewPatient {
            category,
            title: String::new(),
            surname: LastName().fake(),
            first_name: FirstName().fake(),
            middle_name: String::new(),
            gender: Gender::Female,
            date_of_birth: NaiveDate::from_ymd_opt(1985, 5, 20).unwrap(),
            marital_status: String::new(),
            religion: String::new(),
            tribe: String::new(),
            occupation: None,
            personal_number: None,
            employee_type: None,
            division: None,
            location: None,
            nonnpa_type: None,
            dependent_type: None,
            principal_staff_id: None,
            email: String::new(),
            phone: String::new(),
            state_of_residence: String::new(),
            residential_address: String::new(),
            state_of_origin: String::new(),
            lga: String::new(),
            permanent_address: String::new(),
            blood_group: String::new(),
            genotype: String::new(),
            allergies: String::new(),
            nok_surname: String::new(),
            nok_first_name: String::new(),
            nok_middle_name: String::new(),
            nok_relationship: String::new(),
            nok_address: String::new(),
            nok_phone: String::new(),
            is_active: true,
        }
    }

    pub fn employee(personal_number: &str) -> NewPatient {
        NewPatient {
            personal_number: Some(personal_number.into()),
            ..new_patient(PatientCategory::Employee)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{employee, new_patient};
    use super::*;
    use crate::ehr::testing;

    #[actix_web::test]
    async fn staff_ids_use_personal_number_and_suffix_on_collision() {
        let store = testing::store().await;
        let first = store.create_patient(employee(" a2962 "), None).await.unwrap();
        assert_eq!(first.patient_id, "E-A2962");
        let second = store.create_patient(employee("A2962"), None).await.unwrap();
        assert_eq!(second.patient_id, "E-A2962-1");

        let retiree = NewPatient {
            personal_number: Some("b77".into()),
            ..new_patient(PatientCategory::Retiree)
        };
        assert_eq!(store.create_patient(retiree, None).await.unwrap().patient_id, "R-B77");

        let missing = store.create_patient(new_patient(PatientCategory::Employee), None).await;
        assert!(matches!(missing, Err(StoreError::Validation(e)) if e.contains_key("personal_number")));
    }

    #[actix_web::test]
    async fn nonnpa_ids_count_per_type_case_insensitively() {
        let store = testing::store().await;
        let nysc = |kind: &str| NewPatient {
            nonnpa_type: Some(kind.into()),
            ..new_patient(PatientCategory::Nonnpa)
        };
        assert_eq!(store.create_patient(nysc("nysc"), None).await.unwrap().patient_id, "NN-NYSC-01");
        assert_eq!(store.create_patient(nysc("NYSC"), None).await.unwrap().patient_id, "NN-NYSC-02");
        assert_eq!(store.create_patient(nysc("Police"), None).await.unwrap().patient_id, "NN-POLICE-01");
    }

    #[actix_web::test]
    async fn dependents_extend_the_principal_id() {
        let store = testing::store().await;
        let principal = store.create_patient(employee("A1"), None).await.unwrap();
        let dependent = |principal_staff_id| NewPatient {
            principal_staff_id,
            ..new_patient(PatientCategory::Dependent)
        };

        let first = store.create_patient(dependent(Some(principal.id)), None).await.unwrap();
        let second = store.create_patient(dependent(Some(principal.id)), None).await.unwrap();
        assert_eq!(first.patient_id, "E-A1-01");
        assert_eq!(second.patient_id, "E-A1-02");
        assert_eq!(store.patient_dependents(principal.id).await.unwrap().len(), 2);

        let orphan = store.create_patient(dependent(None), None).await;
        assert!(matches!(orphan, Err(StoreError::Validation(e)) if e.contains_key("principal_staff")));

        let chained = store.create_patient(dependent(Some(first.id)), None).await;
        assert!(matches!(chained, Err(StoreError::Validation(e)) if e.contains_key("principal_staff")));
    }

    #[actix_web::test]
    async fn soft_delete_hides_from_default_listing_and_refreshes_cache() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("C3"), None).await.unwrap();
        store.create_patient(employee("C4"), None).await.unwrap();

        store.deactivate_patient(patient.id).await.unwrap();
        assert!(!store.get_patient(patient.id).await.unwrap().is_active);

        let params = ListParams::default();
        let active = store
            .list_patients(&PatientFilter::default(), &params, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(active.count, 1);

        let everything = PatientFilter { include_inactive: true, ..Default::default() };
        let all = store.list_patients(&everything, &params, PageRequest::default()).await.unwrap();
        assert_eq!(all.count, 2);
    }

    #[actix_web::test]
    async fn update_returns_previous_values() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("D5"), None).await.unwrap();
        let update = PatientUpdate { phone: Some("08012345678".into()), ..Default::default() };

        let (before, after) = store.update_patient(patient.id, update).await.unwrap();
        assert_eq!(before.phone, "");
        assert_eq!(after.phone, "08012345678");
        assert_eq!(after.patient_id, "E-D5");
    }

    #[actix_web::test]
    async fn update_validates_principal_like_create() {
        let store = testing::store().await;
        let principal = store.create_patient(employee("D6"), None).await.unwrap();
        let dependent = || NewPatient { principal_staff_id: Some(principal.id), ..new_patient(PatientCategory::Dependent) };
        let child = store.create_patient(dependent(), None).await.unwrap();
        let sibling = store.create_patient(dependent(), None).await.unwrap();
        let principal_of = |id| PatientUpdate { principal_staff_id: Some(Some(id)), ..Default::default() };

        for bad in [child.id, sibling.id, 9_999] {
            let rejected = store.update_patient(child.id, principal_of(bad)).await;
            assert!(matches!(rejected, Err(StoreError::Validation(e)) if e.contains_key("principal_staff")));
        }
        let own = store.update_patient(principal.id, principal_of(principal.id)).await;
        assert!(matches!(own, Err(StoreError::Validation(e)) if e.contains_key("principal_staff")));
        assert_eq!(store.get_patient(child.id).await.unwrap().principal_staff_id, Some(principal.id));
    }

    #[actix_web::test]
    async fn medical_history_is_created_on_first_read() {
        let store = testing::store().await;
        let user = store
            .create_user(crate::ehr::accounts::fixtures::new_user("doc", "Medical Doctor"))
            .await
            .unwrap();
        let patient = store.create_patient(employee("E6"), None).await.unwrap();

        let history = store.medical_history(patient.id).await.unwrap();
        assert!(history.allergies.is_empty());

        let update = MedicalHistoryUpdate {
            allergies: Some(vec![serde_json::json!("penicillin")]),
            ..Default::default()
        };
        let updated = store.update_medical_history(patient.id, update, user.id).await.unwrap();
        assert_eq!(updated.allergies.len(), 1);
        assert_eq!(updated.updated_by, Some(user.id));
        assert!(updated.social_history.is_empty());
    }
}
