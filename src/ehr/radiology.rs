use std::collections::HashMap;

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{allocate_date_scoped, optional_user_name_sql, patient_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::organization::normalize_clinic_name;
use crate::models::radiology::{
    AcquireStudy, NewRadiologyOrder, ProcessingMethod, RadiologyOrder, RadiologyOrderFilter, RadiologyOrderUpdate,
    RadiologyReport, RadiologyReportFilter, RadiologyStudy, RejectRadiologyReport, ReportStudy, ResultStatus,
    ScheduleStudy, StudyStatus, VerifyRadiologyReport,
};

const ORDER_ORDERING: Ordering = Ordering {
    fields: &[("ordered_at", "o.ordered_at"), ("priority", "o.priority")],
    default: "-ordered_at",
    tiebreak: "o.id",
};

const REPORT_ORDERING: Ordering = Ordering {
    fields: &[("created_at", "r.created_at")],
    default: "-created_at",
    tiebreak: "r.id",
};

fn order_columns() -> String {
    format!(
        "o.*, {} AS patient_name, {} AS doctor_name",
        patient_name_sql("p"),
        optional_user_name_sql("d")
    )
}

const ORDER_FROM: &str = "FROM radiology_orders o \
     JOIN patients p ON p.id = o.patient_id \
     LEFT JOIN users d ON d.id = o.doctor_id WHERE 1 = 1";

fn study_select() -> String {
    format!(
        "SELECT s.*, {} AS acquired_by_name, {} AS reported_by_name, {} AS verified_by_name \
         FROM radiology_studies s \
         LEFT JOIN users au ON au.id = s.acquired_by \
         LEFT JOIN users ru ON ru.id = s.reported_by \
         LEFT JOIN users vu ON vu.id = s.verified_by WHERE 1 = 1",
        optional_user_name_sql("au"),
        optional_user_name_sql("ru"),
        optional_user_name_sql("vu")
    )
}

fn report_columns() -> String {
    format!(
        "r.id, r.study_id, r.order_id AS order_pk, o.order_id AS order_id, r.patient_id, \
         {} AS patient_name, r.overall_status, r.priority, r.created_at",
        patient_name_sql("p")
    )
}

const REPORT_FROM: &str = "FROM radiology_reports r \
     JOIN radiology_orders o ON o.id = r.order_id \
     JOIN radiology_studies s ON s.id = r.study_id \
     JOIN patients p ON p.id = r.patient_id WHERE 1 = 1";

impl RadiologyOrderFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND o.patient_id = ").push_bind(patient);
        }
        if let Some(doctor) = self.doctor {
            qb.push(" AND o.doctor_id = ").push_bind(doctor);
        }
        if let Some(priority) = self.priority {
            qb.push(" AND o.priority = ").push_bind(priority);
        }
        push_search(qb, search, &["o.order_id", "o.clinical_notes"]);
    }
}

impl RadiologyReportFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" AND s.status = ")
            .push_bind(self.study_status.unwrap_or(StudyStatus::Reported));
        if let Some(patient) = self.patient {
            qb.push(" AND r.patient_id = ").push_bind(patient);
        }
        if let Some(status) = self.overall_status {
            qb.push(" AND r.overall_status = ").push_bind(status);
        }
        if let Some(priority) = self.priority {
            qb.push(" AND r.priority = ").push_bind(priority);
        }
    }
}

impl EhrDatabase {
    // ===== Orders =====

    #[instrument(skip(self, input), fields(patient_id = input.patient_id, studies = input.studies.len()))]
    pub async fn create_radiology_order(
        &self,
        input: NewRadiologyOrder,
        caller: Option<i64>,
    ) -> StoreResult<RadiologyOrder> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(doctor) = input.doctor_id {
            self.ensure_exists("users", doctor, "doctor").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let clinic = if input.clinic.trim().is_empty() {
            String::new()
        } else {
            normalize_clinic_name(Some(&input.clinic))
        };

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code = allocate_date_scoped(
            &mut *tx,
            "radiology_orders",
            "order_id",
            "RAD",
            now.date_naive(),
            "radiology order ID",
        )
        .await?;
        let id = sqlx::query(
            "INSERT INTO radiology_orders (order_id, patient_id, doctor_id, visit_id, priority, clinic, clinical_notes, ordered_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(input.patient_id)
        .bind(input.doctor_id.or(caller))
        .bind(input.visit_id)
        .bind(input.priority)
        .bind(&clinic)
        .bind(&input.clinical_notes)
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for study in &input.studies {
            sqlx::query(
                "INSERT INTO radiology_studies (order_id, procedure, body_part, modality, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&study.procedure)
            .bind(&study.body_part)
            .bind(&study.modality)
            .bind(StudyStatus::Pending)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(id, order_id = %code, "Radiology order created");
        self.get_radiology_order(id).await
    }

    async fn studies_for_orders(&self, order_ids: &[i64]) -> StoreResult<Vec<RadiologyStudy>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("{} AND s.order_id IN (", study_select()));
        let mut ids = qb.separated(", ");
        for id in order_ids {
            ids.push_bind(*id);
        }
        qb.push(") ORDER BY s.id");
        Ok(qb.build_query_as::<RadiologyStudy>().fetch_all(&self.pool).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_radiology_order(&self, id: i64) -> StoreResult<RadiologyOrder> {
        let mut order =
            sqlx::query_as::<_, RadiologyOrder>(&format!("SELECT {} {ORDER_FROM} AND o.id = ?", order_columns()))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound("Radiology order"))?;
        order.studies = self.studies_for_orders(&[id]).await?;
        Ok(order)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_radiology_orders(
        &self,
        filter: &RadiologyOrderFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<RadiologyOrder>> {
        let search = params.search_term().map(str::to_string);
        let mut page: Page<RadiologyOrder> = self
            .fetch_page(
                &order_columns(),
                ORDER_FROM,
                |qb| filter.push(qb, search.as_deref()),
                &ORDER_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;

        let ids: Vec<i64> = page.results.iter().map(|o| o.id).collect();
        let mut by_order: HashMap<i64, Vec<RadiologyStudy>> = HashMap::new();
        for study in self.studies_for_orders(&ids).await? {
            by_order.entry(study.order_id).or_default().push(study);
        }
        for order in &mut page.results {
            order.studies = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(page)
    }

    #[instrument(skip(self, update))]
    pub async fn update_radiology_order(&self, id: i64, update: RadiologyOrderUpdate) -> StoreResult<RadiologyOrder> {
        let mut order = self.get_radiology_order(id).await?;
        if let Some(v) = update.priority {
            order.priority = v;
        }
        if let Some(v) = update.clinic {
            order.clinic = if v.trim().is_empty() { String::new() } else { normalize_clinic_name(Some(&v)) };
        }
        if let Some(v) = update.clinical_notes {
            order.clinical_notes = v;
        }
        if let Some(doctor) = update.doctor_id {
            if let Some(doctor) = doctor {
                self.ensure_exists("users", doctor, "doctor").await?;
            }
            order.doctor_id = doctor;
        }
        if let Some(visit) = update.visit_id {
            if let Some(visit) = visit {
                self.ensure_exists("visits", visit, "visit").await?;
            }
            order.visit_id = visit;
        }

        sqlx::query(
            "UPDATE radiology_orders SET priority = ?, clinic = ?, clinical_notes = ?, doctor_id = ?, visit_id = ? WHERE id = ?",
        )
        .bind(order.priority)
        .bind(&order.clinic)
        .bind(&order.clinical_notes)
        .bind(order.doctor_id)
        .bind(order.visit_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_radiology_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_radiology_order(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM radiology_orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Radiology order"));
        }
        Ok(())
    }

    // ===== Study workflow =====

    #[instrument(skip(self))]
    pub async fn get_radiology_study(&self, id: i64) -> StoreResult<RadiologyStudy> {
        sqlx::query_as::<_, RadiologyStudy>(&format!("{} AND s.id = ?", study_select()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Radiology study"))
    }

    /// Transition error for a study whose status changed after it was read.
    async fn study_moved(&self, id: i64, entity: &'static str, action: &'static str) -> StoreError {
        match self.get_radiology_study(id).await {
            Ok(study) => StoreError::transition(entity, action, study.status.as_str()),
            Err(err) => err,
        }
    }

    /// A study that belongs to `order_id`.
    async fn order_study(&self, order_id: i64, study_id: i64) -> StoreResult<RadiologyStudy> {
        self.get_radiology_order(order_id).await?;
        let study = self.get_radiology_study(study_id).await?;
        if study.order_id != order_id {
            return Err(StoreError::NotFound("Radiology study"));
        }
        Ok(study)
    }

    #[instrument(skip(self, input), fields(study_id = input.study_id))]
    pub async fn schedule_study(&self, order_id: i64, input: ScheduleStudy, by: i64) -> StoreResult<RadiologyStudy> {
        let study = self.order_study(order_id, input.study_id).await?;
        if !study.status.can_schedule() {
            return Err(StoreError::transition("study", "schedule", study.status.as_str()));
        }
        let updated = sqlx::query(
            "UPDATE radiology_studies SET status = ?, scheduled_date = ?, scheduled_time = ?, scheduled_by = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(StudyStatus::Scheduled)
        .bind(input.scheduled_date)
        .bind(input.scheduled_time)
        .bind(by)
        .bind(Utc::now())
        .bind(study.id)
        .bind(study.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.study_moved(study.id, "study", "schedule").await);
        }

        info!(study_id = study.id, date = %input.scheduled_date, "Study scheduled");
        self.get_radiology_study(study.id).await
    }

    #[instrument(skip(self, input), fields(study_id = input.study_id))]
    pub async fn acquire_study(&self, order_id: i64, input: AcquireStudy, by: i64) -> StoreResult<RadiologyStudy> {
        let study = self.order_study(order_id, input.study_id).await?;
        if !study.status.can_acquire() {
            return Err(StoreError::transition("study", "acquire", study.status.as_str()));
        }
        if input.images_count < 0 {
            return Err(StoreError::field("images_count", "Ensure this value is greater than or equal to 0."));
        }
        let facility = match input.processing_method {
            ProcessingMethod::Outsourced => input.outsourced_facility,
            ProcessingMethod::InHouse => String::new(),
        };
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE radiology_studies SET status = ?, processing_method = ?, outsourced_facility = ?, images_count = ?,
                technical_notes = ?, acquired_by = ?, acquired_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(StudyStatus::Acquired)
        .bind(input.processing_method)
        .bind(&facility)
        .bind(input.images_count)
        .bind(&input.technical_notes)
        .bind(by)
        .bind(now)
        .bind(now)
        .bind(study.id)
        .bind(study.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.study_moved(study.id, "study", "acquire").await);
        }

        info!(study_id = study.id, images = input.images_count, "Study acquired");
        self.get_radiology_study(study.id).await
    }

    /// Writes the report onto the study and opens (or flags) its report record.
    #[instrument(skip(self, input), fields(study_id = input.study_id, critical = input.critical))]
    pub async fn report_study(
        &self,
        order_id: i64,
        input: ReportStudy,
        by: i64,
    ) -> StoreResult<(RadiologyStudy, RadiologyReport)> {
        let study = self.order_study(order_id, input.study_id).await?;
        if !study.status.can_report() {
            return Err(StoreError::transition("study", "report", study.status.as_str()));
        }
        let patient_id: i64 = sqlx::query_scalar("SELECT patient_id FROM radiology_orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await?;
        let initial_status = if input.critical { ResultStatus::Critical } else { ResultStatus::Normal };

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE radiology_studies SET status = ?, report = ?, findings = ?, impression = ?, recommendations = ?,
                reported_by = ?, reported_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(StudyStatus::Reported)
        .bind(input.report_text())
        .bind(&input.findings)
        .bind(&input.impression)
        .bind(&input.recommendations)
        .bind(by)
        .bind(now)
        .bind(now)
        .bind(study.id)
        .bind(study.status)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            drop(tx);
            return Err(self.study_moved(study.id, "study", "report").await);
        }
        sqlx::query(
            "INSERT INTO radiology_reports (study_id, order_id, patient_id, overall_status, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(study_id) DO UPDATE SET overall_status =
                CASE WHEN ? THEN 'critical' ELSE radiology_reports.overall_status END",
        )
        .bind(study.id)
        .bind(order_id)
        .bind(patient_id)
        .bind(initial_status)
        .bind(now)
        .bind(input.critical)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let report_id: i64 = sqlx::query_scalar("SELECT id FROM radiology_reports WHERE study_id = ?")
            .bind(study.id)
            .fetch_one(&self.pool)
            .await?;
        info!(study_id = study.id, report_id, "Study reported");
        Ok((self.get_radiology_study(study.id).await?, self.get_radiology_report(report_id).await?))
    }

    // ===== Reports =====

    #[instrument(skip(self))]
    pub async fn get_radiology_report(&self, id: i64) -> StoreResult<RadiologyReport> {
        let mut report =
            sqlx::query_as::<_, RadiologyReport>(&format!("SELECT {} {REPORT_FROM} AND r.id = ?", report_columns()))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound("Radiology report"))?;
        report.study_details = Some(self.get_radiology_study(report.study_id).await?);
        Ok(report)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_radiology_reports(
        &self,
        filter: &RadiologyReportFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<RadiologyReport>> {
        let mut page: Page<RadiologyReport> = self
            .fetch_page(
                &report_columns(),
                REPORT_FROM,
                |qb| filter.push(qb),
                &REPORT_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;
        for report in &mut page.results {
            report.study_details = Some(self.get_radiology_study(report.study_id).await?);
        }
        Ok(page)
    }

    async fn reviewable_study(&self, report: &RadiologyReport, action: &'static str) -> StoreResult<RadiologyStudy> {
        let study = match &report.study_details {
            Some(study) => study.clone(),
            None => self.get_radiology_study(report.study_id).await?,
        };
        if !study.status.awaits_review() {
            return Err(StoreError::transition("radiology report", action, study.status.as_str()));
        }
        Ok(study)
    }

    #[instrument(skip(self, input))]
    pub async fn verify_radiology_report(
        &self,
        id: i64,
        input: VerifyRadiologyReport,
        by: i64,
    ) -> StoreResult<RadiologyReport> {
        let report = self.get_radiology_report(id).await?;
        let study = self.reviewable_study(&report, "verify").await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE radiology_studies SET status = ?, verified_by = ?, verified_at = ?, verification_notes = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(StudyStatus::Verified)
        .bind(by)
        .bind(now)
        .bind(&input.notes)
        .bind(now)
        .bind(study.id)
        .bind(study.status)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            drop(tx);
            return Err(self.study_moved(study.id, "radiology report", "verify").await);
        }
        sqlx::query("UPDATE radiology_reports SET overall_status = ?, priority = ? WHERE id = ?")
            .bind(input.overall_status)
            .bind(input.priority)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id, study_id = study.id, overall_status = ?input.overall_status, "Radiology report verified");
        self.get_radiology_report(id).await
    }

    /// Sends the study back for re-reporting and drops the report record.
    #[instrument(skip(self, input))]
    pub async fn reject_radiology_report(&self, id: i64, input: RejectRadiologyReport) -> StoreResult<RadiologyStudy> {
        let report = self.get_radiology_report(id).await?;
        let study = self.reviewable_study(&report, "reject").await?;

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE radiology_studies SET status = ?, verification_notes = ?, verified_by = NULL, verified_at = NULL,
                report = '', findings = '', impression = '', recommendations = '', reported_by = NULL,
                reported_at = NULL, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(StudyStatus::Acquired)
        .bind(format!("Rejected: {}", input.reason))
        .bind(Utc::now())
        .bind(study.id)
        .bind(study.status)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            drop(tx);
            return Err(self.study_moved(study.id, "radiology report", "reject").await);
        }
        sqlx::query("DELETE FROM radiology_reports WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id, study_id = study.id, "Radiology report rejected");
        self.get_radiology_study(study.id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;
    use crate::models::radiology::{NewStudy, OrderPriority, ResultPriority};

    fn chest_xray(patient_id: i64) -> NewRadiologyOrder {
        NewRadiologyOrder {
            patient_id,
            doctor_id: None,
            visit_id: None,
            priority: OrderPriority::Urgent,
            clinic: String::new(),
            clinical_notes: "Persistent cough".into(),
            studies: vec![NewStudy { procedure: "Chest X-Ray".into(), body_part: "Chest".into(), modality: "X-Ray".into() }],
        }
    }

    fn acquire(study_id: i64) -> AcquireStudy {
        AcquireStudy {
            study_id,
            processing_method: ProcessingMethod::Outsourced,
            outsourced_facility: "City Imaging".into(),
            images_count: 2,
            technical_notes: String::new(),
        }
    }

    fn critical_report(study_id: i64) -> ReportStudy {
        ReportStudy {
            study_id,
            report: "Right lower lobe consolidation".into(),
            findings: "Opacity".into(),
            impression: "Pneumonia".into(),
            recommendations: String::new(),
            critical: true,
        }
    }

    #[actix_web::test]
    async fn study_is_scheduled_acquired_and_reported() {
        let store = testing::store().await;
        let radiologist = store.create_user(new_user("rad", "Radiologist")).await.unwrap();
        let patient = store.create_patient(employee("R1"), None).await.unwrap();
        let order = store.create_radiology_order(chest_xray(patient.id), Some(radiologist.id)).await.unwrap();
        let today = Utc::now().date_naive().format("%Y%m%d").to_string();
        assert_eq!(order.order_id, format!("RAD-{today}-0001"));
        let study_id = order.studies[0].id;

        let early = store.report_study(order.id, critical_report(study_id), radiologist.id).await;
        assert!(matches!(early, Err(StoreError::InvalidTransition { .. })));

        let scheduled = store
            .schedule_study(
                order.id,
                ScheduleStudy {
                    study_id,
                    scheduled_date: NaiveDate::from_ymd_opt(2025, 3, 20).unwrap(),
                    scheduled_time: None,
                },
                radiologist.id,
            )
            .await
            .unwrap();
        assert_eq!(scheduled.status, StudyStatus::Scheduled);

        let acquired = store.acquire_study(order.id, acquire(study_id), radiologist.id).await.unwrap();
        assert_eq!(acquired.outsourced_facility, "City Imaging");
        assert_eq!(acquired.acquired_by_name.as_deref(), Some("rad"));

        let (study, report) = store.report_study(order.id, critical_report(study_id), radiologist.id).await.unwrap();
        assert!(study.report.starts_with("[CRITICAL FINDING]\n\n"));
        assert_eq!(report.overall_status, Some(ResultStatus::Critical));
        assert_eq!(report.order_id, order.order_id);
    }

    #[actix_web::test]
    async fn racing_acquisitions_record_one() {
        let store = testing::store().await;
        let radiologist = store.create_user(new_user("rad3", "Radiologist")).await.unwrap();
        let patient = store.create_patient(employee("R3"), None).await.unwrap();
        let order = store.create_radiology_order(chest_xray(patient.id), None).await.unwrap();
        let study_id = order.studies[0].id;

        let (a, b) = futures::join!(
            store.acquire_study(order.id, acquire(study_id), radiologist.id),
            store.acquire_study(order.id, acquire(study_id), radiologist.id),
        );
        assert!(a.is_ok() != b.is_ok());
        assert!(matches!(a.err().or(b.err()), Some(StoreError::InvalidTransition { .. })));
    }

    #[actix_web::test]
    async fn rejection_returns_study_for_rework() {
        let store = testing::store().await;
        let radiologist = store.create_user(new_user("rad2", "Radiologist")).await.unwrap();
        let patient = store.create_patient(employee("R2"), None).await.unwrap();
        let order = store.create_radiology_order(chest_xray(patient.id), None).await.unwrap();
        let study_id = order.studies[0].id;
        store.acquire_study(order.id, acquire(study_id), radiologist.id).await.unwrap();
        let (_, report) = store.report_study(order.id, critical_report(study_id), radiologist.id).await.unwrap();

        let study = store
            .reject_radiology_report(report.id, RejectRadiologyReport { reason: "Wrong side".into() })
            .await
            .unwrap();
        assert_eq!(study.status, StudyStatus::Acquired);
        assert_eq!(study.report, "");
        assert_eq!(study.verification_notes, "Rejected: Wrong side");
        assert!(matches!(store.get_radiology_report(report.id).await, Err(StoreError::NotFound(_))));

        let (_, again) = store.report_study(order.id, critical_report(study_id), radiologist.id).await.unwrap();
        let verified = store
            .verify_radiology_report(
                again.id,
                VerifyRadiologyReport { overall_status: ResultStatus::Abnormal, priority: ResultPriority::High, notes: String::new() },
                radiologist.id,
            )
            .await
            .unwrap();
        assert_eq!(verified.overall_status, Some(ResultStatus::Abnormal));
        assert_eq!(verified.study_details.unwrap().status, StudyStatus::Verified);

        let waiting = store
            .list_radiology_reports(&RadiologyReportFilter::default(), &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(waiting.count, 0);
        let done = store
            .list_radiology_reports(
                &RadiologyReportFilter { study_status: Some(StudyStatus::Verified), ..Default::default() },
                &ListParams::default(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(done.count, 1);
    }
}
