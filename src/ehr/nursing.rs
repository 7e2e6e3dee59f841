use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{allocate_date_scoped, optional_user_name_sql, patient_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::nursing::{
    NewNursingOrder, NewProcedure, NursingOrder, NursingOrderFilter, NursingOrderStatus, NursingOrderUpdate, Procedure,
    ProcedureFilter, ProcedureUpdate,
};

const ORDER_ORDERING: Ordering = Ordering {
    fields: &[("ordered_at", "n.ordered_at")],
    default: "-ordered_at",
    tiebreak: "n.id",
};

const PROCEDURE_ORDERING: Ordering = Ordering {
    fields: &[("performed_at", "pr.performed_at")],
    default: "-performed_at",
    tiebreak: "pr.id",
};

fn order_columns() -> String {
    format!(
        "n.*, {} AS patient_name, {} AS ordered_by_name",
        patient_name_sql("p"),
        optional_user_name_sql("u")
    )
}

const ORDER_FROM: &str = "FROM nursing_orders n \
     JOIN patients p ON p.id = n.patient_id \
     LEFT JOIN users u ON u.id = n.ordered_by WHERE 1 = 1";

fn procedure_columns() -> String {
    format!(
        "pr.*, {} AS patient_name, {} AS performed_by_name",
        patient_name_sql("p"),
        optional_user_name_sql("u")
    )
}

const PROCEDURE_FROM: &str = "FROM procedures pr \
     JOIN patients p ON p.id = pr.patient_id \
     LEFT JOIN users u ON u.id = pr.performed_by WHERE 1 = 1";

impl NursingOrderFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND n.patient_id = ").push_bind(patient);
        }
        if let Some(user) = self.ordered_by {
            qb.push(" AND n.ordered_by = ").push_bind(user);
        }
        if let Some(status) = self.status {
            qb.push(" AND n.status = ").push_bind(status);
        }
        if let Some(priority) = self.priority {
            qb.push(" AND n.priority = ").push_bind(priority);
        }
        if let Some(order_type) = &self.order_type {
            qb.push(" AND n.order_type = ").push_bind(order_type.clone());
        }
        push_search(qb, search, &["n.order_id", "n.description"]);
    }
}

impl ProcedureFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND pr.patient_id = ").push_bind(patient);
        }
        if let Some(kind) = self.procedure_type {
            qb.push(" AND pr.procedure_type = ").push_bind(kind);
        }
        if let Some(user) = self.performed_by {
            qb.push(" AND pr.performed_by = ").push_bind(user);
        }
        push_search(qb, search, &["pr.procedure_id", "pr.description", "pr.notes"]);
    }
}

impl EhrDatabase {
    // ===== Nursing orders =====

    #[instrument(skip(self, input), fields(patient_id = input.patient_id))]
    pub async fn create_nursing_order(&self, input: NewNursingOrder, caller: Option<i64>) -> StoreResult<NursingOrder> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(user) = input.ordered_by {
            self.ensure_exists("users", user, "ordered_by").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code =
            allocate_date_scoped(&mut *tx, "nursing_orders", "order_id", "NUR", now.date_naive(), "nursing order ID")
                .await?;
        let id = sqlx::query(
            "INSERT INTO nursing_orders (order_id, patient_id, ordered_by, visit_id, order_type, description, frequency,
                duration, status, priority, ordered_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(input.patient_id)
        .bind(input.ordered_by.or(caller))
        .bind(input.visit_id)
        .bind(&input.order_type)
        .bind(&input.description)
        .bind(&input.frequency)
        .bind(&input.duration)
        .bind(NursingOrderStatus::Pending)
        .bind(input.priority)
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, order_id = %code, "Nursing order created");
        self.get_nursing_order(id).await
    }

    pub async fn get_nursing_order(&self, id: i64) -> StoreResult<NursingOrder> {
        sqlx::query_as::<_, NursingOrder>(&format!("SELECT {} {ORDER_FROM} AND n.id = ?", order_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Nursing order"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_nursing_orders(
        &self,
        filter: &NursingOrderFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<NursingOrder>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &order_columns(),
            ORDER_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &ORDER_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_nursing_order(&self, id: i64, update: NursingOrderUpdate) -> StoreResult<NursingOrder> {
        let mut order = self.get_nursing_order(id).await?;
        if let Some(v) = update.order_type {
            order.order_type = v;
        }
        if let Some(v) = update.description {
            order.description = v;
        }
        if let Some(v) = update.frequency {
            order.frequency = v;
        }
        if let Some(v) = update.duration {
            order.duration = v;
        }
        if let Some(v) = update.priority {
            order.priority = v;
        }
        if let Some(visit) = update.visit_id {
            if let Some(visit) = visit {
                self.ensure_exists("visits", visit, "visit").await?;
            }
            order.visit_id = visit;
        }

        sqlx::query(
            "UPDATE nursing_orders SET order_type = ?, description = ?, frequency = ?, duration = ?, priority = ?,
                visit_id = ?
             WHERE id = ?",
        )
        .bind(&order.order_type)
        .bind(&order.description)
        .bind(&order.frequency)
        .bind(&order.duration)
        .bind(order.priority)
        .bind(order.visit_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_nursing_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_nursing_order(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM nursing_orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Nursing order"));
        }
        Ok(())
    }

    /// Moves `order` to `status` unless its status changed since it was read.
    async fn set_nursing_status(
        &self,
        order: &NursingOrder,
        status: NursingOrderStatus,
        action: &'static str,
    ) -> StoreResult<NursingOrder> {
        let id = order.id;
        let completed_at = (status == NursingOrderStatus::Completed).then(Utc::now);
        let updated = sqlx::query(
            "UPDATE nursing_orders SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ? AND status = ?",
        )
        .bind(status)
        .bind(completed_at)
        .bind(id)
        .bind(order.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            let current = self.get_nursing_order(id).await?.status;
            return Err(StoreError::transition("nursing order", action, current.as_str()));
        }
        info!(id, status = status.as_str(), "Nursing order status changed");
        self.get_nursing_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn start_nursing_order(&self, id: i64) -> StoreResult<NursingOrder> {
        let order = self.get_nursing_order(id).await?;
        if !order.status.can_start() {
            return Err(StoreError::transition("nursing order", "start", order.status.as_str()));
        }
        self.set_nursing_status(&order, NursingOrderStatus::InProgress, "start").await
    }

    #[instrument(skip(self))]
    pub async fn complete_nursing_order(&self, id: i64) -> StoreResult<NursingOrder> {
        let order = self.get_nursing_order(id).await?;
        if !order.status.is_open() {
            return Err(StoreError::transition("nursing order", "complete", order.status.as_str()));
        }
        self.set_nursing_status(&order, NursingOrderStatus::Completed, "complete").await
    }

    #[instrument(skip(self))]
    pub async fn cancel_nursing_order(&self, id: i64) -> StoreResult<NursingOrder> {
        let order = self.get_nursing_order(id).await?;
        if !order.status.is_open() {
            return Err(StoreError::transition("nursing order", "cancel", order.status.as_str()));
        }
        self.set_nursing_status(&order, NursingOrderStatus::Cancelled, "cancel").await
    }

    // ===== Procedures =====

    /// Records a procedure performed by `performed_by`.
    #[instrument(skip(self, input), fields(patient_id = input.patient_id))]
    pub async fn record_procedure(&self, input: NewProcedure, performed_by: Option<i64>) -> StoreResult<Procedure> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(order) = input.nursing_order_id {
            self.ensure_exists("nursing_orders", order, "nursing_order").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code =
            allocate_date_scoped(&mut *tx, "procedures", "procedure_id", "PROC", now.date_naive(), "procedure ID")
                .await?;
        let id = sqlx::query(
            "INSERT INTO procedures (procedure_id, patient_id, nursing_order_id, visit_id, procedure_type, description,
                site, notes, performed_by, performed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(input.patient_id)
        .bind(input.nursing_order_id)
        .bind(input.visit_id)
        .bind(input.procedure_type)
        .bind(&input.description)
        .bind(&input.site)
        .bind(&input.notes)
        .bind(performed_by)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, procedure_id = %code, "Procedure recorded");
        self.get_procedure(id).await
    }

    pub async fn get_procedure(&self, id: i64) -> StoreResult<Procedure> {
        sqlx::query_as::<_, Procedure>(&format!("SELECT {} {PROCEDURE_FROM} AND pr.id = ?", procedure_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Procedure"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_procedures(
        &self,
        filter: &ProcedureFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Procedure>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &procedure_columns(),
            PROCEDURE_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &PROCEDURE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_procedure(&self, id: i64, update: ProcedureUpdate) -> StoreResult<Procedure> {
        let mut procedure = self.get_procedure(id).await?;
        if let Some(v) = update.procedure_type {
            procedure.procedure_type = v;
        }
        if let Some(v) = update.description {
            procedure.description = v;
        }
        if let Some(v) = update.site {
            procedure.site = v;
        }
        if let Some(v) = update.notes {
            procedure.notes = v;
        }
        sqlx::query("UPDATE procedures SET procedure_type = ?, description = ?, site = ?, notes = ? WHERE id = ?")
            .bind(procedure.procedure_type)
            .bind(&procedure.description)
            .bind(&procedure.site)
            .bind(&procedure.notes)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_procedure(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_procedure(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM procedures WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Procedure"));
        }
        Ok(())
    }
}
