use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{required, user_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::organization::{
    Clinic, ClinicFilter, ClinicInput, Department, DepartmentFilter, DepartmentInput, Room, RoomFilter,
    RoomInput,
};

const CLINIC_ORDERING: Ordering = Ordering {
    fields: &[("name", "c.name"), ("created_at", "c.created_at")],
    default: "name",
    tiebreak: "c.id",
};

const DEPARTMENT_ORDERING: Ordering = Ordering {
    fields: &[("name", "d.name"), ("created_at", "d.created_at")],
    default: "name",
    tiebreak: "d.id",
};

const ROOM_ORDERING: Ordering = Ordering {
    fields: &[("room_number", "r.room_number"), ("name", "r.name")],
    default: "room_number",
    tiebreak: "r.id",
};

fn department_columns() -> String {
    format!(
        "d.*, c.name AS clinic_name, CASE WHEN h.id IS NULL THEN NULL ELSE {} END AS head_name",
        user_name_sql("h")
    )
}

const DEPARTMENT_FROM: &str = "FROM departments d \
     JOIN clinics c ON c.id = d.clinic_id \
     LEFT JOIN users h ON h.id = d.head_id WHERE 1 = 1";

const ROOM_COLUMNS: &str = "r.*, c.name AS clinic_name, d.name AS department_name";

const ROOM_FROM: &str = "FROM rooms r \
     LEFT JOIN clinics c ON c.id = r.clinic_id \
     LEFT JOIN departments d ON d.id = r.department_id WHERE 1 = 1";

impl ClinicFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(active) = self.is_active {
            qb.push(" AND c.is_active = ").push_bind(active);
        }
        push_search(qb, search, &["c.name", "c.code", "c.location"]);
    }
}

impl DepartmentFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(clinic) = self.clinic {
            qb.push(" AND d.clinic_id = ").push_bind(clinic);
        }
        if let Some(active) = self.is_active {
            qb.push(" AND d.is_active = ").push_bind(active);
        }
        push_search(qb, search, &["d.name", "d.code"]);
    }
}

impl RoomFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(clinic) = self.clinic {
            qb.push(" AND r.clinic_id = ").push_bind(clinic);
        }
        if let Some(department) = self.department {
            qb.push(" AND r.department_id = ").push_bind(department);
        }
        if let Some(room_type) = self.room_type {
            qb.push(" AND r.room_type = ").push_bind(room_type);
        }
        if let Some(status) = self.status {
            qb.push(" AND r.status = ").push_bind(status);
        }
        if let Some(active) = self.is_active {
            qb.push(" AND r.is_active = ").push_bind(active);
        }
        push_search(qb, search, &["r.name", "r.room_number", "r.location"]);
    }
}

impl EhrDatabase {
    // ===== Clinics =====

    #[instrument(skip(self, input))]
    pub async fn create_clinic(&self, input: ClinicInput) -> StoreResult<Clinic> {
        let name = required(input.name, "name")?;
        let code = required(input.code, "code")?;
        self.ensure_unique("clinics", "name", &name, None, "clinic with this name already exists.")
            .await?;
        self.ensure_unique("clinics", "code", &code, None, "clinic with this code already exists.")
            .await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO clinics (name, code, description, location, phone, email, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(&code)
        .bind(input.description.unwrap_or_default())
        .bind(input.location.unwrap_or_default())
        .bind(input.phone.unwrap_or_default())
        .bind(input.email.unwrap_or_default())
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(clinic_id = id, "Clinic created: {}", name);
        self.get_clinic(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_clinic(&self, id: i64) -> StoreResult<Clinic> {
        sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Clinic"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_clinics(
        &self,
        filter: &ClinicFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Clinic>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            "c.*",
            "FROM clinics c WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &CLINIC_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_clinic(&self, id: i64, input: ClinicInput) -> StoreResult<Clinic> {
        let mut clinic = self.get_clinic(id).await?;
        if let Some(name) = input.name {
            self.ensure_unique("clinics", "name", &name, Some(id), "clinic with this name already exists.")
                .await?;
            clinic.name = name;
        }
        if let Some(code) = input.code {
            self.ensure_unique("clinics", "code", &code, Some(id), "clinic with this code already exists.")
                .await?;
            clinic.code = code;
        }
        if let Some(v) = input.description {
            clinic.description = v;
        }
        if let Some(v) = input.location {
            clinic.location = v;
        }
        if let Some(v) = input.phone {
            clinic.phone = v;
        }
        if let Some(v) = input.email {
            clinic.email = v;
        }
        if let Some(v) = input.is_active {
            clinic.is_active = v;
        }

        sqlx::query(
            "UPDATE clinics SET name = ?, code = ?, description = ?, location = ?, phone = ?, email = ?,
                is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&clinic.name)
        .bind(&clinic.code)
        .bind(&clinic.description)
        .bind(&clinic.location)
        .bind(&clinic.phone)
        .bind(&clinic.email)
        .bind(clinic.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(clinic_id = id, "Clinic updated");
        self.get_clinic(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_clinic(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM clinics WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Clinic"));
        }
        info!(clinic_id = id, "Clinic deleted");
        Ok(())
    }

    // ===== Departments =====

    async fn ensure_department_name_free(&self, clinic_id: i64, name: &str, except: Option<i64>) -> StoreResult<()> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE clinic_id = ? AND name = ? AND id <> ?)",
        )
        .bind(clinic_id)
        .bind(name)
        .bind(except.unwrap_or(0))
        .fetch_one(&self.pool)
        .await?;
        if taken {
            return Err(StoreError::field(
                "non_field_errors",
                "The fields clinic, name must make a unique set.",
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, input))]
    pub async fn create_department(&self, input: DepartmentInput) -> StoreResult<Department> {
        let clinic_id = required(input.clinic_id, "clinic")?;
        let name = required(input.name, "name")?;
        let code = required(input.code, "code")?;
        let head_id = input.head_id.flatten();

        self.ensure_exists("clinics", clinic_id, "clinic").await?;
        if let Some(head) = head_id {
            self.ensure_exists("users", head, "head").await?;
        }
        self.ensure_department_name_free(clinic_id, &name, None).await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO departments (clinic_id, name, code, description, head_id, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(clinic_id)
        .bind(&name)
        .bind(&code)
        .bind(input.description.unwrap_or_default())
        .bind(head_id)
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(department_id = id, clinic_id, "Department created: {}", name);
        self.get_department(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_department(&self, id: i64) -> StoreResult<Department> {
        sqlx::query_as::<_, Department>(&format!(
            "SELECT {} {DEPARTMENT_FROM} AND d.id = ?",
            department_columns()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("Department"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_departments(
        &self,
        filter: &DepartmentFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Department>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &department_columns(),
            DEPARTMENT_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &DEPARTMENT_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_department(&self, id: i64, input: DepartmentInput) -> StoreResult<Department> {
        let mut department = self.get_department(id).await?;
        if let Some(clinic_id) = input.clinic_id {
            self.ensure_exists("clinics", clinic_id, "clinic").await?;
            department.clinic_id = clinic_id;
        }
        if let Some(v) = input.name {
            department.name = v;
        }
        if let Some(v) = input.code {
            department.code = v;
        }
        if let Some(v) = input.description {
            department.description = v;
        }
        if let Some(head) = input.head_id {
            if let Some(user) = head {
                self.ensure_exists("users", user, "head").await?;
            }
            department.head_id = head;
        }
        if let Some(v) = input.is_active {
            department.is_active = v;
        }
        self.ensure_department_name_free(department.clinic_id, &department.name, Some(id))
            .await?;

        sqlx::query(
            "UPDATE departments SET clinic_id = ?, name = ?, code = ?, description = ?, head_id = ?,
                is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(department.clinic_id)
        .bind(&department.name)
        .bind(&department.code)
        .bind(&department.description)
        .bind(department.head_id)
        .bind(department.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(department_id = id, "Department updated");
        self.get_department(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_department(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Department"));
        }
        Ok(())
    }

    // ===== Rooms =====

    #[instrument(skip(self, input))]
    pub async fn create_room(&self, input: RoomInput) -> StoreResult<Room> {
        let name = required(input.name, "name")?;
        let room_number = required(input.room_number, "room_number")?;
        let clinic_id = input.clinic_id.flatten();
        let department_id = input.department_id.flatten();

        if let Some(clinic) = clinic_id {
            self.ensure_exists("clinics", clinic, "clinic").await?;
        }
        if let Some(department) = department_id {
            self.ensure_exists("departments", department, "department").await?;
        }
        self.ensure_unique(
            "rooms",
            "room_number",
            &room_number,
            None,
            "room with this room number already exists.",
        )
        .await?;

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO rooms (
                name, room_number, clinic_id, department_id, room_type, location, floor, specialty,
                capacity, status, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(&room_number)
        .bind(clinic_id)
        .bind(department_id)
        .bind(input.room_type.unwrap_or_default())
        .bind(input.location.unwrap_or_default())
        .bind(input.floor.unwrap_or_default())
        .bind(input.specialty.unwrap_or_default())
        .bind(input.capacity.unwrap_or(1))
        .bind(input.status.unwrap_or_default())
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(room_id = id, "Room created: {} ({})", name, room_number);
        self.get_room(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_room(&self, id: i64) -> StoreResult<Room> {
        sqlx::query_as::<_, Room>(&format!("SELECT {ROOM_COLUMNS} {ROOM_FROM} AND r.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Room"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_rooms(
        &self,
        filter: &RoomFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Room>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            ROOM_COLUMNS,
            ROOM_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &ROOM_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_room(&self, id: i64, input: RoomInput) -> StoreResult<Room> {
        let mut room = self.get_room(id).await?;
        if let Some(v) = input.name {
            room.name = v;
        }
        if let Some(number) = input.room_number {
            self.ensure_unique(
                "rooms",
                "room_number",
                &number,
                Some(id),
                "room with this room number already exists.",
            )
            .await?;
            room.room_number = number;
        }
        if let Some(clinic) = input.clinic_id {
            if let Some(clinic) = clinic {
                self.ensure_exists("clinics", clinic, "clinic").await?;
            }
            room.clinic_id = clinic;
        }
        if let Some(department) = input.department_id {
            if let Some(department) = department {
                self.ensure_exists("departments", department, "department").await?;
            }
            room.department_id = department;
        }
        if let Some(v) = input.room_type {
            room.room_type = v;
        }
        if let Some(v) = input.location {
            room.location = v;
        }
        if let Some(v) = input.floor {
            room.floor = v;
        }
        if let Some(v) = input.specialty {
            room.specialty = v;
        }
        if let Some(v) = input.capacity {
            room.capacity = v;
        }
        if let Some(v) = input.status {
            room.status = v;
        }
        if let Some(v) = input.is_active {
            room.is_active = v;
        }

        sqlx::query(
            "UPDATE rooms SET name = ?, room_number = ?, clinic_id = ?, department_id = ?, room_type = ?,
                location = ?, floor = ?, specialty = ?, capacity = ?, status = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&room.name)
        .bind(&room.room_number)
        .bind(room.clinic_id)
        .bind(room.department_id)
        .bind(room.room_type)
        .bind(&room.location)
        .bind(&room.floor)
        .bind(&room.specialty)
        .bind(room.capacity)
        .bind(room.status)
        .bind(room.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(room_id = id, "Room updated");
        self.get_room(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_room(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Room"));
        }
        Ok(())
    }
}
