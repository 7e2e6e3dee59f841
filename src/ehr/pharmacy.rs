use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};

use super::ids::timestamped;
use super::{allocate_unique, optional_user_name_sql, patient_name_sql, required, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::pharmacy::{
    expiry_threshold, AlertKind, AlertSummary, Dispense, DispenseFilter, DispenseRequest, InventoryFilter,
    InventoryInput, InventoryItem, Medication, MedicationFilter, MedicationInput, NewPrescription, Prescription,
    PrescriptionFilter, PrescriptionItem, PrescriptionStatus, PrescriptionUpdate,
};

const TIMESTAMPED_ID_ATTEMPTS: u32 = 10;

const MEDICATION_ORDERING: Ordering = Ordering {
    fields: &[("name", "m.name"), ("code", "m.code")],
    default: "name",
    tiebreak: "m.id",
};

const INVENTORY_ORDERING: Ordering = Ordering {
    fields: &[("expiry_date", "i.expiry_date"), ("created_at", "i.created_at"), ("quantity", "i.quantity")],
    default: "expiry_date",
    tiebreak: "i.id",
};

const PRESCRIPTION_ORDERING: Ordering = Ordering {
    fields: &[("prescribed_at", "rx.prescribed_at")],
    default: "-prescribed_at",
    tiebreak: "rx.id",
};

const DISPENSE_ORDERING: Ordering = Ordering {
    fields: &[("dispensed_at", "ds.dispensed_at")],
    default: "-dispensed_at",
    tiebreak: "ds.id",
};

const INVENTORY_COLUMNS: &str = "i.*, m.name AS medication_name";

const INVENTORY_FROM: &str = "FROM medication_inventory i JOIN medications m ON m.id = i.medication_id WHERE 1 = 1";

fn prescription_columns() -> String {
    format!(
        "rx.*, {} AS patient_name, {} AS doctor_name",
        patient_name_sql("p"),
        optional_user_name_sql("d")
    )
}

const PRESCRIPTION_FROM: &str = "FROM prescriptions rx \
     JOIN patients p ON p.id = rx.patient_id \
     LEFT JOIN users d ON d.id = rx.doctor_id WHERE 1 = 1";

const ITEM_SELECT: &str = "SELECT pi.*, m.name AS medication_name, m.code AS medication_code \
     FROM prescription_items pi JOIN medications m ON m.id = pi.medication_id";

fn dispense_columns() -> String {
    format!(
        "ds.*, m.name AS medication_name, {} AS patient_name, {} AS dispensed_by_name",
        patient_name_sql("p"),
        optional_user_name_sql("u")
    )
}

const DISPENSE_FROM: &str = "FROM dispenses ds \
     JOIN medications m ON m.id = ds.medication_id \
     JOIN prescriptions rx ON rx.id = ds.prescription_id \
     JOIN patients p ON p.id = rx.patient_id \
     LEFT JOIN users u ON u.id = ds.dispensed_by WHERE 1 = 1";

impl MedicationFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(form) = &self.form {
            qb.push(" AND m.form = ").push_bind(form.clone());
        }
        if let Some(category) = &self.category {
            qb.push(" AND m.category = ").push_bind(category.clone());
        }
        qb.push(" AND m.is_active = ").push_bind(self.is_active.unwrap_or(true));
        push_search(qb, search, &["m.name", "m.generic_name", "m.code"]);
    }
}

impl InventoryFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(medication) = self.medication {
            qb.push(" AND i.medication_id = ").push_bind(medication);
        }
        if let Some(location) = &self.location {
            qb.push(" AND i.location = ").push_bind(location.clone());
        }
        push_search(qb, search, &["m.name", "i.batch_number"]);
    }
}

impl AlertKind {
    fn push(self, qb: &mut QueryBuilder<'_, Sqlite>, today: NaiveDate) {
        let threshold = expiry_threshold(today);
        match self {
            AlertKind::LowStock => {
                qb.push(" AND i.quantity <= i.min_stock_level");
            }
            AlertKind::Expiring => {
                qb.push(" AND i.expiry_date <= ")
                    .push_bind(threshold)
                    .push(" AND i.expiry_date >= ")
                    .push_bind(today);
            }
            AlertKind::Expired => {
                qb.push(" AND i.expiry_date < ").push_bind(today);
            }
            AlertKind::All => {
                qb.push(" AND (i.quantity <= i.min_stock_level OR i.expiry_date <= ")
                    .push_bind(threshold)
                    .push(")");
            }
        }
    }
}

impl PrescriptionFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND rx.patient_id = ").push_bind(patient);
        }
        if let Some(doctor) = self.doctor {
            qb.push(" AND rx.doctor_id = ").push_bind(doctor);
        }
        if let Some(status) = self.status {
            qb.push(" AND rx.status = ").push_bind(status);
        }
        push_search(qb, search, &["rx.prescription_id", "rx.diagnosis", "rx.notes"]);
    }
}

impl DispenseFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(prescription) = self.prescription {
            qb.push(" AND ds.prescription_id = ").push_bind(prescription);
        }
        if let Some(medication) = self.medication {
            qb.push(" AND ds.medication_id = ").push_bind(medication);
        }
        if let Some(user) = self.dispensed_by {
            qb.push(" AND ds.dispensed_by = ").push_bind(user);
        }
    }
}

impl EhrDatabase {
    // ===== Medications =====

    #[instrument(skip(self, input))]
    pub async fn create_medication(&self, input: MedicationInput) -> StoreResult<Medication> {
        let name = required(input.name, "name")?;
        let code = required(input.code, "code")?;
        let unit = required(input.unit, "unit")?;
        self.ensure_unique("medications", "code", &code, None, "medication with this code already exists.")
            .await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO medications (
                name, generic_name, code, unit, strength, form, category, manufacturer, pack_size,
                prescription_required, description, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(input.generic_name.unwrap_or_default())
        .bind(&code)
        .bind(&unit)
        .bind(input.strength.unwrap_or_default())
        .bind(input.form.unwrap_or_default())
        .bind(input.category.unwrap_or_default())
        .bind(input.manufacturer.unwrap_or_default())
        .bind(input.pack_size)
        .bind(input.prescription_required.unwrap_or(false))
        .bind(input.description.unwrap_or_default())
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, code = %code, "Medication created");
        self.get_medication(id).await
    }

    pub async fn get_medication(&self, id: i64) -> StoreResult<Medication> {
        sqlx::query_as::<_, Medication>("SELECT * FROM medications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Medication"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_medications(
        &self,
        filter: &MedicationFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Medication>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            "m.*",
            "FROM medications m WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &MEDICATION_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_medication(&self, id: i64, input: MedicationInput) -> StoreResult<Medication> {
        let mut medication = self.get_medication(id).await?;
        if let Some(code) = input.code {
            self.ensure_unique("medications", "code", &code, Some(id), "medication with this code already exists.")
                .await?;
            medication.code = code;
        }
        let texts = [
            (input.name, &mut medication.name),
            (input.generic_name, &mut medication.generic_name),
            (input.unit, &mut medication.unit),
            (input.strength, &mut medication.strength),
            (input.form, &mut medication.form),
            (input.category, &mut medication.category),
            (input.manufacturer, &mut medication.manufacturer),
            (input.description, &mut medication.description),
        ];
        for (value, slot) in texts {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if input.pack_size.is_some() {
            medication.pack_size = input.pack_size;
        }
        if let Some(v) = input.prescription_required {
            medication.prescription_required = v;
        }
        if let Some(v) = input.is_active {
            medication.is_active = v;
        }

        sqlx::query(
            "UPDATE medications SET name = ?, generic_name = ?, code = ?, unit = ?, strength = ?, form = ?,
                category = ?, manufacturer = ?, pack_size = ?, prescription_required = ?, description = ?,
                is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&medication.name)
        .bind(&medication.generic_name)
        .bind(&medication.code)
        .bind(&medication.unit)
        .bind(&medication.strength)
        .bind(&medication.form)
        .bind(&medication.category)
        .bind(&medication.manufacturer)
        .bind(medication.pack_size)
        .bind(medication.prescription_required)
        .bind(&medication.description)
        .bind(medication.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_medication(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_medication(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM medications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Medication"));
        }
        Ok(())
    }

    // ===== Inventory =====

    #[instrument(skip(self, input))]
    pub async fn create_inventory_item(&self, input: InventoryInput) -> StoreResult<InventoryItem> {
        let medication_id = required(input.medication_id, "medication")?;
        let medication = match self.get_medication(medication_id).await {
            Ok(m) => m,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::field(
                    "medication",
                    format!("Invalid pk \"{medication_id}\" - object does not exist."),
                ))
            }
            Err(e) => return Err(e),
        };
        let batch_number = required(input.batch_number, "batch_number")?;
        let expiry_date = required(input.expiry_date, "expiry_date")?;
        let quantity = required(input.quantity, "quantity")?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO medication_inventory (
                medication_id, batch_number, expiry_date, quantity, unit, min_stock_level, max_stock_level,
                location, supplier, purchase_price, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(medication_id)
        .bind(&batch_number)
        .bind(expiry_date)
        .bind(quantity)
        .bind(input.unit.unwrap_or(medication.unit))
        .bind(input.min_stock_level.unwrap_or(0.0))
        .bind(input.max_stock_level.flatten())
        .bind(input.location.unwrap_or_default())
        .bind(input.supplier.unwrap_or_default())
        .bind(input.purchase_price.flatten())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, medication_id, batch = %batch_number, "Inventory batch added");
        self.get_inventory_item(id).await
    }

    pub async fn get_inventory_item(&self, id: i64) -> StoreResult<InventoryItem> {
        let item = sqlx::query_as::<_, InventoryItem>(&format!("SELECT {INVENTORY_COLUMNS} {INVENTORY_FROM} AND i.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Inventory item"))?;
        Ok(item.flagged(Utc::now().date_naive()))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_inventory(
        &self,
        filter: &InventoryFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<InventoryItem>> {
        let search = params.search_term().map(str::to_string);
        let today = Utc::now().date_naive();
        let page: Page<InventoryItem> = self
            .fetch_page(
                INVENTORY_COLUMNS,
                INVENTORY_FROM,
                |qb| filter.push(qb, search.as_deref()),
                &INVENTORY_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;
        Ok(page.map(|item| item.flagged(today)))
    }

    #[instrument(skip(self, input))]
    pub async fn update_inventory_item(&self, id: i64, input: InventoryInput) -> StoreResult<InventoryItem> {
        let mut item = self.get_inventory_item(id).await?;
        if let Some(medication) = input.medication_id {
            self.ensure_exists("medications", medication, "medication").await?;
            item.medication_id = medication;
        }
        if let Some(v) = input.batch_number {
            item.batch_number = v;
        }
        if let Some(v) = input.expiry_date {
            item.expiry_date = v;
        }
        if let Some(v) = input.quantity {
            item.quantity = v;
        }
        if let Some(v) = input.unit {
            item.unit = v;
        }
        if let Some(v) = input.min_stock_level {
            item.min_stock_level = v;
        }
        if let Some(v) = input.max_stock_level {
            item.max_stock_level = v;
        }
        if let Some(v) = input.location {
            item.location = v;
        }
        if let Some(v) = input.supplier {
            item.supplier = v;
        }
        if let Some(v) = input.purchase_price {
            item.purchase_price = v;
        }

        sqlx::query(
            "UPDATE medication_inventory SET medication_id = ?, batch_number = ?, expiry_date = ?, quantity = ?,
                unit = ?, min_stock_level = ?, max_stock_level = ?, location = ?, supplier = ?, purchase_price = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(item.medication_id)
        .bind(&item.batch_number)
        .bind(item.expiry_date)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.min_stock_level)
        .bind(item.max_stock_level)
        .bind(&item.location)
        .bind(&item.supplier)
        .bind(item.purchase_price)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_inventory_item(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_inventory_item(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM medication_inventory WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Inventory item"));
        }
        Ok(())
    }

    // ===== Inventory alerts =====

    #[instrument(skip(self, params))]
    pub async fn inventory_alerts(
        &self,
        kind: AlertKind,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<InventoryItem>> {
        let today = Utc::now().date_naive();
        let page: Page<InventoryItem> = self
            .fetch_page(
                INVENTORY_COLUMNS,
                INVENTORY_FROM,
                |qb| kind.push(qb, today),
                &INVENTORY_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;
        Ok(page.map(|item| item.flagged(today)))
    }

    #[instrument(skip(self))]
    pub async fn inventory_alert_summary(&self) -> StoreResult<AlertSummary> {
        let today = Utc::now().date_naive();
        let count = |kind: AlertKind| {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) {INVENTORY_FROM}"));
            kind.push(&mut qb, today);
            qb
        };
        let mut low = count(AlertKind::LowStock);
        let mut expiring = count(AlertKind::Expiring);
        let mut expired = count(AlertKind::Expired);
        let mut all = count(AlertKind::All);
        Ok(AlertSummary {
            low_stock_count: low.build_query_scalar().fetch_one(&self.pool).await?,
            expiring_count: expiring.build_query_scalar().fetch_one(&self.pool).await?,
            expired_count: expired.build_query_scalar().fetch_one(&self.pool).await?,
            total_alerts: all.build_query_scalar().fetch_one(&self.pool).await?,
        })
    }

    // ===== Prescriptions =====

    /// The prescribing doctor defaults to `caller`; item units default to the medication's unit.
    #[instrument(skip(self, input), fields(patient_id = input.patient_id, items = input.items.len()))]
    pub async fn create_prescription(&self, input: NewPrescription, caller: Option<i64>) -> StoreResult<Prescription> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(doctor) = input.doctor_id {
            self.ensure_exists("users", doctor, "doctor").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let mut units = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let medication = match self.get_medication(item.medication_id).await {
                Ok(m) => m,
                Err(StoreError::NotFound(_)) => {
                    return Err(StoreError::field(
                        "medications",
                        format!("Invalid pk \"{}\" - object does not exist.", item.medication_id),
                    ))
                }
                Err(e) => return Err(e),
            };
            units.push(item.unit.clone().unwrap_or(medication.unit));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code = allocate_unique(
            &mut *tx,
            "prescriptions",
            "prescription_id",
            "prescription ID",
            TIMESTAMPED_ID_ATTEMPTS,
            |_| timestamped("RX", now),
        )
        .await?;
        let id = sqlx::query(
            "INSERT INTO prescriptions (prescription_id, patient_id, doctor_id, visit_id, status, diagnosis, notes, prescribed_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(input.patient_id)
        .bind(input.doctor_id.or(caller))
        .bind(input.visit_id)
        .bind(PrescriptionStatus::Pending)
        .bind(&input.diagnosis)
        .bind(&input.notes)
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (item, unit) in input.items.iter().zip(&units) {
            sqlx::query(
                "INSERT INTO prescription_items (prescription_id, medication_id, quantity, unit, dosage, frequency, duration, instructions)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(item.medication_id)
            .bind(item.quantity)
            .bind(unit)
            .bind(&item.dosage)
            .bind(&item.frequency)
            .bind(&item.duration)
            .bind(&item.instructions)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(id, prescription_id = %code, "Prescription created");
        self.get_prescription(id).await
    }

    async fn items_for_prescriptions(&self, ids: &[i64]) -> StoreResult<Vec<PrescriptionItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("{ITEM_SELECT} WHERE pi.prescription_id IN ("));
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        qb.push(") ORDER BY pi.id");
        Ok(qb.build_query_as::<PrescriptionItem>().fetch_all(&self.pool).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_prescription(&self, id: i64) -> StoreResult<Prescription> {
        let mut prescription = sqlx::query_as::<_, Prescription>(&format!(
            "SELECT {} {PRESCRIPTION_FROM} AND rx.id = ?",
            prescription_columns()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("Prescription"))?;
        prescription.items = self.items_for_prescriptions(&[id]).await?;
        Ok(prescription)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_prescriptions(
        &self,
        filter: &PrescriptionFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Prescription>> {
        let search = params.search_term().map(str::to_string);
        let mut page: Page<Prescription> = self
            .fetch_page(
                &prescription_columns(),
                PRESCRIPTION_FROM,
                |qb| filter.push(qb, search.as_deref()),
                &PRESCRIPTION_ORDERING.clause(params.ordering.as_deref()),
                request,
            )
            .await?;

        let ids: Vec<i64> = page.results.iter().map(|p| p.id).collect();
        let mut by_prescription: HashMap<i64, Vec<PrescriptionItem>> = HashMap::new();
        for item in self.items_for_prescriptions(&ids).await? {
            by_prescription.entry(item.prescription_id).or_default().push(item);
        }
        for prescription in &mut page.results {
            prescription.items = by_prescription.remove(&prescription.id).unwrap_or_default();
        }
        Ok(page)
    }

    #[instrument(skip(self, update))]
    pub async fn update_prescription(&self, id: i64, update: PrescriptionUpdate) -> StoreResult<Prescription> {
        let mut prescription = self.get_prescription(id).await?;
        if let Some(v) = update.diagnosis {
            prescription.diagnosis = v;
        }
        if let Some(v) = update.notes {
            prescription.notes = v;
        }
        if let Some(doctor) = update.doctor_id {
            if let Some(doctor) = doctor {
                self.ensure_exists("users", doctor, "doctor").await?;
            }
            prescription.doctor_id = doctor;
        }
        if let Some(visit) = update.visit_id {
            if let Some(visit) = visit {
                self.ensure_exists("visits", visit, "visit").await?;
            }
            prescription.visit_id = visit;
        }

        sqlx::query("UPDATE prescriptions SET diagnosis = ?, notes = ?, doctor_id = ?, visit_id = ? WHERE id = ?")
            .bind(&prescription.diagnosis)
            .bind(&prescription.notes)
            .bind(prescription.doctor_id)
            .bind(prescription.visit_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_prescription(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_prescription(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM prescriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Prescription"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cancel_prescription(&self, id: i64) -> StoreResult<Prescription> {
        let prescription = self.get_prescription(id).await?;
        if !prescription.status.can_cancel() {
            return Err(StoreError::transition("prescription", "cancel", prescription.status.as_str()));
        }
        let updated = sqlx::query("UPDATE prescriptions SET status = ? WHERE id = ? AND status = ?")
            .bind(PrescriptionStatus::Cancelled)
            .bind(id)
            .bind(prescription.status)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            let current = self.get_prescription(id).await?.status;
            return Err(StoreError::transition("prescription", "cancel", current.as_str()));
        }
        info!(id, prescription_id = %prescription.prescription_id, "Prescription cancelled");
        self.get_prescription(id).await
    }

    // ===== Dispensing =====

    /// Dispenses part or all of one item, drawing stock from `inventory_id` when given.
    #[instrument(skip(self, request), fields(item_id = request.item_id, quantity = request.quantity))]
    pub async fn dispense(&self, prescription_id: i64, request: DispenseRequest, by: i64) -> StoreResult<Dispense> {
        if request.quantity <= 0.0 {
            return Err(StoreError::field("quantity", "Quantity must be greater than zero."));
        }
        let prescription = self.get_prescription(prescription_id).await?;
        if !prescription.status.can_dispense() {
            return Err(StoreError::transition("prescription", "dispense", prescription.status.as_str()));
        }
        let item = prescription
            .items
            .iter()
            .find(|i| i.id == request.item_id)
            .ok_or(StoreError::NotFound("Prescription item"))?;
        let inventory = match request.inventory_id {
            Some(inventory_id) => {
                let stock = self.get_inventory_item(inventory_id).await?;
                if stock.quantity < request.quantity {
                    warn!(inventory_id, available = stock.quantity, requested = request.quantity, "Insufficient stock");
                    return Err(StoreError::field("quantity", "Insufficient stock"));
                }
                Some(stock)
            }
            None => None,
        };

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        if let Some(stock) = &inventory {
            let drawn = sqlx::query(
                "UPDATE medication_inventory SET quantity = quantity - ?, updated_at = ? WHERE id = ? AND quantity >= ?",
            )
            .bind(request.quantity)
            .bind(now)
            .bind(stock.id)
            .bind(request.quantity)
            .execute(&mut *tx)
            .await?;
            if drawn.rows_affected() == 0 {
                return Err(StoreError::field("quantity", "Insufficient stock"));
            }
        }

        let dispense_code = allocate_unique(
            &mut *tx,
            "dispenses",
            "dispense_id",
            "dispense ID",
            TIMESTAMPED_ID_ATTEMPTS,
            |_| timestamped("DISP", now),
        )
        .await?;
        let dispense_id = sqlx::query(
            "INSERT INTO dispenses (
                dispense_id, prescription_id, prescription_item_id, medication_id, inventory_item_id,
                quantity, unit, batch_number, dispensed_by, dispensed_at, notes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dispense_code)
        .bind(prescription_id)
        .bind(item.id)
        .bind(item.medication_id)
        .bind(inventory.as_ref().map(|s| s.id))
        .bind(request.quantity)
        .bind(&item.unit)
        .bind(inventory.as_ref().map(|s| s.batch_number.clone()).unwrap_or_default())
        .bind(by)
        .bind(now)
        .bind(&request.notes)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "UPDATE prescription_items SET dispensed_quantity = dispensed_quantity + ?,
                is_dispensed = (dispensed_quantity + ? >= quantity)
             WHERE id = ?",
        )
        .bind(request.quantity)
        .bind(request.quantity)
        .bind(item.id)
        .execute(&mut *tx)
        .await?;

        let quantities: Vec<(f64, f64)> =
            sqlx::query_as("SELECT quantity, dispensed_quantity FROM prescription_items WHERE prescription_id = ?")
                .bind(prescription_id)
                .fetch_all(&mut *tx)
                .await?;
        let status = prescription.status.recalculated(&quantities);
        let dispensed_at = match status {
            PrescriptionStatus::Dispensed => prescription.dispensed_at.or(Some(now)),
            _ => prescription.dispensed_at,
        };
        sqlx::query("UPDATE prescriptions SET status = ?, dispensed_at = ? WHERE id = ?")
            .bind(status)
            .bind(dispensed_at)
            .bind(prescription_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            prescription_id = %prescription.prescription_id,
            dispense_id = %dispense_code,
            status = status.as_str(),
            "Medication dispensed"
        );
        self.get_dispense(dispense_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_dispense(&self, id: i64) -> StoreResult<Dispense> {
        sqlx::query_as::<_, Dispense>(&format!("SELECT {} {DISPENSE_FROM} AND ds.id = ?", dispense_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Dispense"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_dispenses(
        &self,
        filter: &DispenseFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Dispense>> {
        self.fetch_page(
            &dispense_columns(),
            DISPENSE_FROM,
            |qb| filter.push(qb),
            &DISPENSE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }
}


#[cfg(test)]
mod tests {
    use chrono::Days;

    use super::fixtures::{medication, prescription, stock};
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;

    #[actix_web::test]
    async fn prescription_gets_rx_code_and_medication_unit() {
        let store = testing::store().await;
        let doctor = store.create_user(new_user("drrx", "Medical Doctor")).await.unwrap();
        let patient = store.create_patient(employee("P1"), None).await.unwrap();
        let drug = store.create_medication(medication("PCM")).await.unwrap();

        let rx = store.create_prescription(prescription(patient.id, drug.id, 12.0), Some(doctor.id)).await.unwrap();
        assert!(rx.prescription_id.starts_with("RX-"));
        assert_eq!(rx.prescription_id.len(), "RX-20250314-090530-1234".len());
        assert_eq!(rx.doctor_id, Some(doctor.id));
        assert_eq!(rx.status, PrescriptionStatus::Pending);
        assert_eq!(rx.items[0].unit, "tablet");
        assert_eq!(rx.items[0].medication_code, "PCM");
    }

    #[actix_web::test]
    async fn dispensing_draws_stock_and_updates_status() {
        let store = testing::store().await;
        let pharmacist = store.create_user(new_user("pharm", "Pharmacist")).await.unwrap();
        let patient = store.create_patient(employee("P2"), None).await.unwrap();
        let drug = store.create_medication(medication("ART")).await.unwrap();
        let expiry = Utc::now().date_naive().checked_add_days(Days::new(365)).unwrap();
        let batch = store.create_inventory_item(stock(drug.id, 20.0, expiry)).await.unwrap();
        let rx = store.create_prescription(prescription(patient.id, drug.id, 12.0), None).await.unwrap();
        let item_id = rx.items[0].id;

        let too_much = store
            .dispense(
                rx.id,
                DispenseRequest { item_id, quantity: 25.0, inventory_id: Some(batch.id), notes: String::new() },
                pharmacist.id,
            )
            .await;
        assert!(matches!(too_much, Err(StoreError::Validation(e)) if e.contains_key("quantity")));

        let first = store
            .dispense(
                rx.id,
                DispenseRequest { item_id, quantity: 5.0, inventory_id: Some(batch.id), notes: String::new() },
                pharmacist.id,
            )
            .await
            .unwrap();
        assert!(first.dispense_id.starts_with("DISP-"));
        assert_eq!(first.batch_number, "BATCH-1");
        assert_eq!(store.get_prescription(rx.id).await.unwrap().status, PrescriptionStatus::PartiallyDispensed);

        store
            .dispense(
                rx.id,
                DispenseRequest { item_id, quantity: 7.0, inventory_id: Some(batch.id), notes: String::new() },
                pharmacist.id,
            )
            .await
            .unwrap();
        let done = store.get_prescription(rx.id).await.unwrap();
        assert_eq!(done.status, PrescriptionStatus::Dispensed);
        assert!(done.dispensed_at.is_some());
        assert!(done.items[0].is_dispensed);

        let remaining = store.get_inventory_item(batch.id).await.unwrap();
        assert_eq!(remaining.quantity, 8.0);
        assert!(remaining.is_low_stock);

        let again = store
            .dispense(
                rx.id,
                DispenseRequest { item_id, quantity: 1.0, inventory_id: None, notes: String::new() },
                pharmacist.id,
            )
            .await;
        assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));

        let history = store
            .list_dispenses(
                &DispenseFilter { prescription: Some(rx.id), ..Default::default() },
                &ListParams::default(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(history.count, 2);
    }

    #[actix_web::test]
    async fn cancel_only_from_open_states() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("P3"), None).await.unwrap();
        let drug = store.create_medication(medication("AMX")).await.unwrap();
        let rx = store.create_prescription(prescription(patient.id, drug.id, 1.0), None).await.unwrap();

        let cancelled = store.cancel_prescription(rx.id).await.unwrap();
        assert_eq!(cancelled.status, PrescriptionStatus::Cancelled);
        assert!(matches!(store.cancel_prescription(rx.id).await, Err(StoreError::InvalidTransition { .. })));
    }

    #[actix_web::test]
    async fn racing_cancellations_succeed_once() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("P4"), None).await.unwrap();
        let drug = store.create_medication(medication("CIP")).await.unwrap();
        let rx = store.create_prescription(prescription(patient.id, drug.id, 1.0), None).await.unwrap();

        let (a, b) = futures::join!(store.cancel_prescription(rx.id), store.cancel_prescription(rx.id));
        assert!(a.is_ok() != b.is_ok());
        assert!(matches!(a.err().or(b.err()), Some(StoreError::InvalidTransition { .. })));
    }

    #[actix_web::test]
    async fn alerts_split_low_stock_and_expiry() {
        let store = testing::store().await;
        let drug = store.create_medication(medication("IBU")).await.unwrap();
        let today = Utc::now().date_naive();
        store
            .create_inventory_item(stock(drug.id, 100.0, today.checked_add_days(Days::new(400)).unwrap()))
            .await
            .unwrap();
        store
            .create_inventory_item(stock(drug.id, 2.0, today.checked_add_days(Days::new(400)).unwrap()))
            .await
            .unwrap();
        store
            .create_inventory_item(stock(drug.id, 100.0, today.checked_add_days(Days::new(10)).unwrap()))
            .await
            .unwrap();
        store
            .create_inventory_item(stock(drug.id, 100.0, today.checked_sub_days(Days::new(1)).unwrap()))
            .await
            .unwrap();

        let summary = store.inventory_alert_summary().await.unwrap();
        assert_eq!(
            summary,
            AlertSummary { low_stock_count: 1, expiring_count: 1, expired_count: 1, total_alerts: 3 }
        );

        let expired = store
            .inventory_alerts(AlertKind::Expired, &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(expired.count, 1);
        assert!(expired.results[0].is_expired);
    }
}
