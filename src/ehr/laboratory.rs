use std::collections::HashMap;

use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{
    allocate_date_scoped, optional_user_name_sql, patient_name_sql, required, EhrDatabase, StoreResult,
};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::laboratory::{
    CollectSample, LabOrder, LabOrderFilter, LabOrderUpdate, LabResult, LabResultFilter, LabTemplate,
    LabTemplateFilter, LabTemplateInput, LabTest, LabTestFilter, LabTestStatus, NewLabOrder, ProcessTest,
    ProcessingMethod, SubmitResults, VerifyLabResult,
};
use crate::models::organization::normalize_clinic_name;

const TEMPLATE_ORDERING: Ordering = Ordering {
    fields: &[("name", "lt.name"), ("code", "lt.code")],
    default: "name",
    tiebreak: "lt.id",
};

const ORDER_ORDERING: Ordering = Ordering {
    fields: &[("ordered_at", "o.ordered_at"), ("priority", "o.priority")],
    default: "-ordered_at",
    tiebreak: "o.id",
};

const TEST_ORDERING: Ordering = Ordering {
    fields: &[("created_at", "t.created_at")],
    default: "-created_at",
    tiebreak: "t.id",
};

const RESULT_ORDERING: Ordering = Ordering {
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

const ORDER_FROM: &str = "FROM lab_orders o \
     JOIN patients p ON p.id = o.patient_id \
     LEFT JOIN users d ON d.id = o.doctor_id WHERE 1 = 1";

fn test_columns() -> String {
    format!(
        "t.*, tp.name AS template_name, {} AS collected_by_name, {} AS processed_by_name, {} AS verified_by_name",
        optional_user_name_sql("cu"),
        optional_user_name_sql("pu"),
        optional_user_name_sql("vu")
    )
}

const TEST_FROM: &str = "FROM lab_tests t \
     LEFT JOIN lab_templates tp ON tp.id = t.template_id \
     LEFT JOIN users cu ON cu.id = t.collected_by \
     LEFT JOIN users pu ON pu.id = t.processed_by \
     LEFT JOIN users vu ON vu.id = t.verified_by WHERE 1 = 1";

fn result_columns() -> String {
    format!(
        "r.id, r.test_id, r.order_id AS order_pk, o.order_id AS order_id, r.patient_id, \
         {} AS patient_name, r.overall_status, r.priority, r.created_at",
        patient_name_sql("p")
    )
}

const RESULT_FROM: &str = "FROM lab_results r \
     JOIN lab_orders o ON o.id = r.order_id \
     JOIN lab_tests t ON t.id = r.test_id \
     JOIN patients p ON p.id = r.patient_id WHERE 1 = 1";

impl LabTemplateFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(sample_type) = &self.sample_type {
            qb.push(" AND lt.sample_type = ").push_bind(sample_type.clone());
        }
        // Retired templates stay out of the catalogue unless asked for.
        qb.push(" AND lt.is_active = ").push_bind(self.is_active.unwrap_or(true));
        push_search(qb, search, &["lt.name", "lt.code"]);
    }
}

impl LabOrderFilter {
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
        if let Some(status) = self.status {
            qb.push(" AND EXISTS (SELECT 1 FROM lab_tests st WHERE st.order_id = o.id AND st.status = ")
                .push_bind(status)
                .push(")");
        }
        push_search(qb, search, &["o.order_id", "o.clinical_notes"]);
    }
}

impl LabTestFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(order) = self.order {
            qb.push(" AND t.order_id = ").push_bind(order);
        }
        if let Some(status) = self.status {
            qb.push(" AND t.status = ").push_bind(status);
        }
        if let Some(method) = self.processing_method {
            qb.push(" AND t.processing_method = ").push_bind(method);
        }
    }
}

impl LabResultFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" AND t.status = ").push_bind(LabTestStatus::ResultsReady);
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

/// Name, code and sample type of a test about to be ordered.
struct ResolvedTest {
    template_id: Option<i64>,
    name: String,
    code: String,
    sample_type: String,
}

impl EhrDatabase {
    // ===== Templates =====

    #[instrument(skip(self, input))]
    pub async fn create_lab_template(&self, input: LabTemplateInput) -> StoreResult<LabTemplate> {
        let name = required(input.name, "name")?;
        let code = required(input.code, "code")?;
        let sample_type = required(input.sample_type, "sample_type")?;
        self.ensure_unique("lab_templates", "code", &code, None, "lab template with this code already exists.")
            .await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO lab_templates (name, code, sample_type, description, normal_range, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(&code)
        .bind(&sample_type)
        .bind(input.description.unwrap_or_default())
        .bind(Json(input.normal_range.unwrap_or_default()))
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, code = %code, "Lab template created");
        self.get_lab_template(id).await
    }

    pub async fn get_lab_template(&self, id: i64) -> StoreResult<LabTemplate> {
        sqlx::query_as::<_, LabTemplate>("SELECT * FROM lab_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Lab template"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_lab_templates(
        &self,
        filter: &LabTemplateFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<LabTemplate>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            "lt.*",
            "FROM lab_templates lt WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &TEMPLATE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_lab_template(&self, id: i64, input: LabTemplateInput) -> StoreResult<LabTemplate> {
        let mut template = self.get_lab_template(id).await?;
        if let Some(code) = input.code {
            self.ensure_unique("lab_templates", "code", &code, Some(id), "lab template with this code already exists.")
                .await?;
            template.code = code;
        }
        if let Some(v) = input.name {
            template.name = v;
        }
        if let Some(v) = input.sample_type {
            template.sample_type = v;
        }
        if let Some(v) = input.description {
            template.description = v;
        }
        if let Some(v) = input.normal_range {
            template.normal_range = Json(v);
        }
        if let Some(v) = input.is_active {
            template.is_active = v;
        }

        sqlx::query(
            "UPDATE lab_templates SET name = ?, code = ?, sample_type = ?, description = ?, normal_range = ?,
                is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&template.name)
        .bind(&template.code)
        .bind(&template.sample_type)
        .bind(&template.description)
        .bind(&template.normal_range)
        .bind(template.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_lab_template(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_lab_template(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM lab_templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Lab template"));
        }
        Ok(())
    }

    // ===== Orders =====

    /// Creates the order and its tests together. The ordering doctor defaults to `caller`.
    #[instrument(skip(self, input), fields(patient_id = input.patient_id, tests = input.tests.len()))]
    pub async fn create_lab_order(&self, input: NewLabOrder, caller: Option<i64>) -> StoreResult<LabOrder> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        let doctor_id = input.doctor_id.or(caller);
        if let Some(doctor) = input.doctor_id {
            self.ensure_exists("users", doctor, "doctor").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let mut tests = Vec::with_capacity(input.tests.len());
        for requested in input.tests {
            let template = match requested.template_id {
                Some(template_id) => match self.get_lab_template(template_id).await {
                    Ok(t) => Some(t),
                    Err(StoreError::NotFound(_)) => {
                        return Err(StoreError::field(
                            "tests",
                            format!("Invalid pk \"{template_id}\" - object does not exist."),
                        ))
                    }
                    Err(e) => return Err(e),
                },
                None => None,
            };
            let name = requested.name.or_else(|| template.as_ref().map(|t| t.name.clone()));
            let code = requested.code.or_else(|| template.as_ref().map(|t| t.code.clone()));
            let sample_type = requested.sample_type.or_else(|| template.as_ref().map(|t| t.sample_type.clone()));
            tests.push(ResolvedTest {
                template_id: requested.template_id,
                name: required(name, "name")?,
                code: required(code, "code")?,
                sample_type: required(sample_type, "sample_type")?,
            });
        }
        let clinic = if input.clinic.trim().is_empty() {
            String::new()
        } else {
            normalize_clinic_name(Some(&input.clinic))
        };

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order_code =
            allocate_date_scoped(&mut *tx, "lab_orders", "order_id", "LAB", now.date_naive(), "lab order ID").await?;
        let id = sqlx::query(
            "INSERT INTO lab_orders (order_id, patient_id, doctor_id, visit_id, priority, clinic, clinical_notes, ordered_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order_code)
        .bind(input.patient_id)
        .bind(doctor_id)
        .bind(input.visit_id)
        .bind(input.priority)
        .bind(&clinic)
        .bind(&input.clinical_notes)
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for test in &tests {
            sqlx::query(
                "INSERT INTO lab_tests (order_id, template_id, name, code, sample_type, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(test.template_id)
            .bind(&test.name)
            .bind(&test.code)
            .bind(&test.sample_type)
            .bind(LabTestStatus::Pending)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(id, order_id = %order_code, "Lab order created");
        self.get_lab_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_lab_order(&self, id: i64) -> StoreResult<LabOrder> {
        let mut order = sqlx::query_as::<_, LabOrder>(&format!("SELECT {} {ORDER_FROM} AND o.id = ?", order_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Lab order"))?;
        order.tests = self.tests_for_orders(&[id]).await?;
        Ok(order)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_lab_orders(
        &self,
        filter: &LabOrderFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<LabOrder>> {
        let search = params.search_term().map(str::to_string);
        let mut page: Page<LabOrder> = self
            .fetch_page(
                &order_columns(),
                ORDER_FROM,
                |qb| filter.push(qb, search.as_deref()),
                &ORDER_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;

        let ids: Vec<i64> = page.results.iter().map(|o| o.id).collect();
        let mut by_order: HashMap<i64, Vec<LabTest>> = HashMap::new();
        for test in self.tests_for_orders(&ids).await? {
            by_order.entry(test.order_id).or_default().push(test);
        }
        for order in &mut page.results {
            order.tests = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(page)
    }

    #[instrument(skip(self, update))]
    pub async fn update_lab_order(&self, id: i64, update: LabOrderUpdate) -> StoreResult<LabOrder> {
        let mut order = self.get_lab_order(id).await?;
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

        sqlx::query("UPDATE lab_orders SET priority = ?, clinic = ?, clinical_notes = ?, doctor_id = ?, visit_id = ? WHERE id = ?")
            .bind(order.priority)
            .bind(&order.clinic)
            .bind(&order.clinical_notes)
            .bind(order.doctor_id)
            .bind(order.visit_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        info!(id, order_id = %order.order_id, "Lab order updated");
        self.get_lab_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_lab_order(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM lab_orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Lab order"));
        }
        Ok(())
    }

    // ===== Tests =====

    async fn tests_for_orders(&self, order_ids: &[i64]) -> StoreResult<Vec<LabTest>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} {TEST_FROM} AND t.order_id IN (", test_columns()));
        let mut ids = qb.separated(", ");
        for id in order_ids {
            ids.push_bind(*id);
        }
        qb.push(") ORDER BY t.id");
        Ok(qb.build_query_as::<LabTest>().fetch_all(&self.pool).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_lab_test(&self, id: i64) -> StoreResult<LabTest> {
        sqlx::query_as::<_, LabTest>(&format!("SELECT {} {TEST_FROM} AND t.id = ?", test_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Lab test"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_lab_tests(
        &self,
        filter: &LabTestFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<LabTest>> {
        self.fetch_page(
            &test_columns(),
            TEST_FROM,
            |qb| filter.push(qb),
            &TEST_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    /// Transition error for a test whose status changed after it was read.
    async fn lab_test_moved(&self, id: i64, action: &'static str) -> StoreError {
        match self.get_lab_test(id).await {
            Ok(test) => StoreError::transition("lab test", action, test.status.as_str()),
            Err(err) => err,
        }
    }

    /// Loads a test of `order_id` and checks it may move to `target`.
    async fn order_test_for(
        &self,
        order_id: i64,
        test_id: i64,
        target: LabTestStatus,
        action: &'static str,
    ) -> StoreResult<LabTest> {
        self.get_lab_order(order_id).await?;
        let test = self.get_lab_test(test_id).await?;
        if test.order_id != order_id {
            return Err(StoreError::NotFound("Lab test"));
        }
        if !test.status.can_become(target) {
            return Err(StoreError::transition("lab test", action, test.status.as_str()));
        }
        Ok(test)
    }

    #[instrument(skip(self, input), fields(test_id = input.test_id))]
    pub async fn collect_sample(&self, order_id: i64, input: CollectSample, by: i64) -> StoreResult<LabTest> {
        let test = self
            .order_test_for(order_id, input.test_id, LabTestStatus::SampleCollected, "collect a sample for")
            .await?;
        let notes = input.notes_text().unwrap_or(test.notes);
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE lab_tests SET status = ?, collected_by = ?, collected_at = ?, notes = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(LabTestStatus::SampleCollected)
        .bind(by)
        .bind(now)
        .bind(&notes)
        .bind(now)
        .bind(test.id)
        .bind(test.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.lab_test_moved(test.id, "collect a sample for").await);
        }

        info!(test_id = test.id, "Lab sample collected");
        self.get_lab_test(test.id).await
    }

    #[instrument(skip(self, input), fields(test_id = input.test_id))]
    pub async fn process_lab_test(&self, order_id: i64, input: ProcessTest, by: i64) -> StoreResult<LabTest> {
        let test = self
            .order_test_for(order_id, input.test_id, LabTestStatus::Processing, "process")
            .await?;
        let outsourced_lab = match input.processing_method {
            ProcessingMethod::Outsourced => input.outsourced_lab,
            ProcessingMethod::InHouse => String::new(),
        };
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE lab_tests SET status = ?, processing_method = ?, outsourced_lab = ?, processed_by = ?,
                processed_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(LabTestStatus::Processing)
        .bind(input.processing_method)
        .bind(&outsourced_lab)
        .bind(by)
        .bind(now)
        .bind(now)
        .bind(test.id)
        .bind(test.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.lab_test_moved(test.id, "process").await);
        }

        info!(test_id = test.id, method = ?input.processing_method, "Lab test processing");
        self.get_lab_test(test.id).await
    }

    /// Stores the results and opens the result record awaiting verification.
    #[instrument(skip(self, input), fields(test_id = input.test_id))]
    pub async fn submit_lab_results(&self, order_id: i64, input: SubmitResults) -> StoreResult<(LabTest, LabResult)> {
        let test = self
            .order_test_for(order_id, input.test_id, LabTestStatus::ResultsReady, "submit results for")
            .await?;
        let patient_id: i64 = sqlx::query_scalar("SELECT patient_id FROM lab_orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE lab_tests SET status = ?, results = ?, notes = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(LabTestStatus::ResultsReady)
        .bind(Json(&input.results))
        .bind(&input.notes)
        .bind(now)
        .bind(test.id)
        .bind(test.status)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            drop(tx);
            return Err(self.lab_test_moved(test.id, "submit results for").await);
        }
        sqlx::query(
            "INSERT INTO lab_results (test_id, order_id, patient_id, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(test_id) DO NOTHING",
        )
        .bind(test.id)
        .bind(order_id)
        .bind(patient_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let result_id: i64 = sqlx::query_scalar("SELECT id FROM lab_results WHERE test_id = ?")
            .bind(test.id)
            .fetch_one(&self.pool)
            .await?;
        info!(test_id = test.id, result_id, "Lab results submitted");
        Ok((self.get_lab_test(test.id).await?, self.get_lab_result(result_id).await?))
    }

    // ===== Results =====

    #[instrument(skip(self))]
    pub async fn get_lab_result(&self, id: i64) -> StoreResult<LabResult> {
        let mut result =
            sqlx::query_as::<_, LabResult>(&format!("SELECT {} {RESULT_FROM} AND r.id = ?", result_columns()))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound("Lab result"))?;
        result.test_details = Some(self.get_lab_test(result.test_id).await?);
        Ok(result)
    }

    /// Results whose test is waiting for verification.
    #[instrument(skip(self, filter, params))]
    pub async fn list_lab_results(
        &self,
        filter: &LabResultFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<LabResult>> {
        let mut page: Page<LabResult> = self
            .fetch_page(
                &result_columns(),
                RESULT_FROM,
                |qb| filter.push(qb),
                &RESULT_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;
        for result in &mut page.results {
            result.test_details = Some(self.get_lab_test(result.test_id).await?);
        }
        Ok(page)
    }

    #[instrument(skip(self, input))]
    pub async fn verify_lab_result(&self, id: i64, input: VerifyLabResult, by: i64) -> StoreResult<LabResult> {
        let result = self.get_lab_result(id).await?;
        let status = result
            .test_details
            .as_ref()
            .map(|t| t.status)
            .unwrap_or_default();
        if !status.can_become(LabTestStatus::Verified) {
            return Err(StoreError::transition("lab result", "verify", status.as_str()));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE lab_tests SET status = ?, verified_by = ?, verified_at = ?, verification_notes = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(LabTestStatus::Verified)
        .bind(by)
        .bind(now)
        .bind(&input.notes)
        .bind(now)
        .bind(result.test_id)
        .bind(status)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            drop(tx);
            return Err(self.lab_test_moved(result.test_id, "verify").await);
        }
        sqlx::query("UPDATE lab_results SET overall_status = ?, priority = ? WHERE id = ?")
            .bind(input.overall_status)
            .bind(input.priority)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id, test_id = result.test_id, overall_status = ?input.overall_status, "Lab result verified");
        self.get_lab_result(id).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::cbc_order;
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;
    use crate::models::laboratory::{NewLabTest, ResultPriority, ResultStatus};

    #[actix_web::test]
    async fn order_gets_daily_code_and_caller_as_doctor() {
        let store = testing::store().await;
        let doctor = store.create_user(new_user("drlab", "Medical Doctor")).await.unwrap();
        let patient = store.create_patient(employee("L1"), None).await.unwrap();

        let order = store.create_lab_order(cbc_order(patient.id), Some(doctor.id)).await.unwrap();
        let today = Utc::now().date_naive().format("%Y%m%d").to_string();
        assert_eq!(order.order_id, format!("LAB-{today}-0001"));
        assert_eq!(order.doctor_id, Some(doctor.id));
        assert_eq!(order.tests.len(), 1);
        assert_eq!(order.tests[0].status, LabTestStatus::Pending);

        let second = store.create_lab_order(cbc_order(patient.id), Some(doctor.id)).await.unwrap();
        assert_eq!(second.order_id, format!("LAB-{today}-0002"));
    }

    #[actix_web::test]
    async fn template_fills_missing_test_fields() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("L2"), None).await.unwrap();
        let template = store
            .create_lab_template(LabTemplateInput {
                name: Some("Malaria Parasite".into()),
                code: Some("MP".into()),
                sample_type: Some("blood".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut input = cbc_order(patient.id);
        input.tests = vec![NewLabTest { template_id: Some(template.id), ..Default::default() }];
        let order = store.create_lab_order(input, None).await.unwrap();
        assert_eq!(order.tests[0].code, "MP");
        assert_eq!(order.tests[0].template_name.as_deref(), Some("Malaria Parasite"));
    }

    #[actix_web::test]
    async fn test_walks_through_the_workflow() {
        let store = testing::store().await;
        let scientist = store.create_user(new_user("labsci", "Laboratory Scientist")).await.unwrap();
        let patient = store.create_patient(employee("L3"), None).await.unwrap();
        let order = store.create_lab_order(cbc_order(patient.id), None).await.unwrap();
        let test_id = order.tests[0].id;

        let skipped = store
            .process_lab_test(
                order.id,
                ProcessTest { test_id, processing_method: ProcessingMethod::InHouse, outsourced_lab: String::new() },
                scientist.id,
            )
            .await;
        assert!(matches!(skipped, Err(StoreError::InvalidTransition { .. })));

        let collected = store
            .collect_sample(
                order.id,
                CollectSample { test_id, collection_method: "Venipuncture".into(), notes: String::new() },
                scientist.id,
            )
            .await
            .unwrap();
        assert_eq!(collected.notes, "Method: Venipuncture");
        assert_eq!(collected.collected_by_name.as_deref(), Some("labsci"));

        let processed = store
            .process_lab_test(
                order.id,
                ProcessTest { test_id, processing_method: ProcessingMethod::InHouse, outsourced_lab: "Elsewhere".into() },
                scientist.id,
            )
            .await
            .unwrap();
        assert_eq!(processed.outsourced_lab, "");

        let mut results = serde_json::Map::new();
        results.insert("hb".into(), serde_json::json!(13.2));
        let (test, result) = store
            .submit_lab_results(order.id, SubmitResults { test_id, results, notes: "ok".into() })
            .await
            .unwrap();
        assert_eq!(test.status, LabTestStatus::ResultsReady);
        assert_eq!(result.order_id, order.order_id);
        assert_eq!(result.overall_status, None);

        let pending = store
            .list_lab_results(&LabResultFilter::default(), &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(pending.count, 1);

        let verified = store
            .verify_lab_result(
                result.id,
                VerifyLabResult { overall_status: ResultStatus::Abnormal, priority: ResultPriority::High, notes: "repeat".into() },
                scientist.id,
            )
            .await
            .unwrap();
        assert_eq!(verified.overall_status, Some(ResultStatus::Abnormal));
        let details = verified.test_details.unwrap();
        assert_eq!(details.status, LabTestStatus::Verified);
        assert_eq!(details.verification_notes, "repeat");

        let pending = store
            .list_lab_results(&LabResultFilter::default(), &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(pending.count, 0);
    }

    #[actix_web::test]
    async fn racing_collections_move_the_test_once() {
        let store = testing::store().await;
        let scientist = store.create_user(new_user("labrace", "Laboratory Scientist")).await.unwrap();
        let patient = store.create_patient(employee("L9"), None).await.unwrap();
        let order = store.create_lab_order(cbc_order(patient.id), None).await.unwrap();
        let test_id = order.tests[0].id;
        let collect = || CollectSample { test_id, collection_method: "Venipuncture".into(), notes: String::new() };

        let (first, second) = futures::join!(
            store.collect_sample(order.id, collect(), scientist.id),
            store.collect_sample(order.id, collect(), scientist.id),
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(StoreError::InvalidTransition { .. }))));
    }

    #[actix_web::test]
    async fn test_from_another_order_is_not_found() {
        let store = testing::store().await;
        let user = store.create_user(new_user("labsci2", "Laboratory Scientist")).await.unwrap();
        let patient = store.create_patient(employee("L4"), None).await.unwrap();
        let first = store.create_lab_order(cbc_order(patient.id), None).await.unwrap();
        let second = store.create_lab_order(cbc_order(patient.id), None).await.unwrap();

        let result = store
            .collect_sample(
                first.id,
                CollectSample { test_id: second.tests[0].id, collection_method: String::new(), notes: String::new() },
                user.id,
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound("Lab test"))));
    }
}
