use chrono::{Datelike, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use super::ids::{date_prefix, date_scoped, referral_id, trailing_number};
use super::{allocate_unique, optional_user_name_sql, patient_name_sql, required, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::consultation::{
    ConsultationRoom, ConsultationRoomFilter, ConsultationRoomInput, ConsultationSession, ConsultationSessionFilter,
    ConsultationSessionUpdate, NewConsultationSession, NewQueueEntry, QueueEntry, QueueEntryUpdate, QueueFilter,
    Referral, ReferralFilter, ReferralInput, ReferralStatus, ReferralStatusUpdate, SessionStatus, SoapNotes,
    DEFAULT_QUEUE_PRIORITY,
};

const SEQUENCE_ATTEMPTS: u32 = 100;

const ROOM_ORDERING: Ordering = Ordering {
    fields: &[("room_number", "cr.room_number"), ("name", "cr.name")],
    default: "room_number",
    tiebreak: "cr.id",
};

const SESSION_ORDERING: Ordering = Ordering {
    fields: &[("started_at", "s.started_at")],
    default: "-started_at",
    tiebreak: "s.id",
};

const QUEUE_ORDERING: Ordering = Ordering {
    fields: &[("priority", "q.priority"), ("queued_at", "q.queued_at")],
    default: "priority,queued_at",
    tiebreak: "q.id",
};

const REFERRAL_ORDERING: Ordering = Ordering {
    fields: &[("referred_at", "rf.referred_at"), ("urgency", "rf.urgency")],
    default: "-referred_at",
    tiebreak: "rf.id",
};

fn session_columns() -> String {
    format!(
        "s.*, cr.name AS room_name, {} AS patient_name, {} AS doctor_name",
        patient_name_sql("p"),
        optional_user_name_sql("d")
    )
}

const SESSION_FROM: &str = "FROM consultation_sessions s \
     JOIN consultation_rooms cr ON cr.id = s.room_id \
     JOIN patients p ON p.id = s.patient_id \
     LEFT JOIN users d ON d.id = s.doctor_id WHERE 1 = 1";

fn queue_columns() -> String {
    format!("q.*, cr.name AS room_name, {} AS patient_name", patient_name_sql("p"))
}

const QUEUE_FROM: &str = "FROM consultation_queue q \
     JOIN consultation_rooms cr ON cr.id = q.room_id \
     JOIN patients p ON p.id = q.patient_id WHERE 1 = 1";

fn referral_columns() -> String {
    format!(
        "rf.*, {} AS patient_name, {} AS referred_by_name",
        patient_name_sql("p"),
        optional_user_name_sql("u")
    )
}

const REFERRAL_FROM: &str = "FROM referrals rf \
     JOIN patients p ON p.id = rf.patient_id \
     LEFT JOIN users u ON u.id = rf.referred_by WHERE 1 = 1";

impl ConsultationRoomFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        qb.push(" AND cr.is_active = ").push_bind(true);
        if let Some(status) = self.status {
            qb.push(" AND cr.status = ").push_bind(status);
        }
        if let Some(specialty) = &self.specialty {
            qb.push(" AND cr.specialty = ").push_bind(specialty.clone());
        }
        push_search(qb, search, &["cr.name", "cr.room_number", "cr.location"]);
    }
}

impl ConsultationSessionFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(room) = self.room {
            qb.push(" AND s.room_id = ").push_bind(room);
        }
        if let Some(patient) = self.patient {
            qb.push(" AND s.patient_id = ").push_bind(patient);
        }
        if let Some(doctor) = self.doctor {
            qb.push(" AND s.doctor_id = ").push_bind(doctor);
        }
        if let Some(status) = self.status {
            qb.push(" AND s.status = ").push_bind(status);
        }
        push_search(qb, search, &["s.session_id", "s.chief_complaint", "s.notes"]);
    }
}

impl QueueFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(room) = self.room {
            qb.push(" AND q.room_id = ").push_bind(room);
        }
        if let Some(patient) = self.patient {
            qb.push(" AND q.patient_id = ").push_bind(patient);
        }
        if let Some(active) = self.is_active {
            qb.push(" AND q.is_active = ").push_bind(active);
        }
    }
}

impl ReferralFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND rf.patient_id = ").push_bind(patient);
        }
        if let Some(status) = self.status {
            qb.push(" AND rf.status = ").push_bind(status);
        }
        if let Some(urgency) = self.urgency {
            qb.push(" AND rf.urgency = ").push_bind(urgency);
        }
        if let Some(facility_type) = self.facility_type {
            qb.push(" AND rf.facility_type = ").push_bind(facility_type);
        }
        push_search(qb, search, &["rf.referral_id", "rf.specialty", "rf.facility", "rf.reason"]);
    }
}

/// Next number after the highest identifier already issued under `prefix`.
async fn next_in_sequence(conn: &mut SqliteConnection, table: &str, column: &str, prefix: &str) -> StoreResult<i64> {
    let last: Option<String> = sqlx::query_scalar(&format!(
        "SELECT {column} FROM {table} WHERE {column} LIKE ? ORDER BY {column} DESC LIMIT 1"
    ))
    .bind(format!("{prefix}%"))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(last.as_deref().and_then(trailing_number).unwrap_or(0) + 1)
}

async fn allocate_session_id(conn: &mut SqliteConnection, date: NaiveDate) -> StoreResult<String> {
    let next = next_in_sequence(conn, "consultation_sessions", "session_id", &date_prefix("SESS", date)).await?;
    allocate_unique(conn, "consultation_sessions", "session_id", "session ID", SEQUENCE_ATTEMPTS, |n| {
        date_scoped("SESS", date, next + i64::from(n), 6)
    })
    .await
}

async fn allocate_referral_id(conn: &mut SqliteConnection, year: i32) -> StoreResult<String> {
    let next = next_in_sequence(conn, "referrals", "referral_id", &format!("REF-{year}-")).await?;
    allocate_unique(conn, "referrals", "referral_id", "referral ID", SEQUENCE_ATTEMPTS, |n| {
        referral_id(year, next + i64::from(n))
    })
    .await
}

fn apply_soap(session: &mut ConsultationSession, soap: SoapNotes) {
    if let Some(v) = soap.chief_complaint {
        session.chief_complaint = v;
    }
    if let Some(v) = soap.history_of_presenting_illness {
        session.history_of_presenting_illness = v;
    }
    if let Some(v) = soap.physical_examination {
        session.physical_examination = v;
    }
    if let Some(v) = soap.assessment {
        session.assessment = v;
    }
    if let Some(v) = soap.plan {
        session.plan = v;
    }
    if let Some(v) = soap.notes {
        session.notes = v;
    }
}

impl EhrDatabase {
    // ===== Rooms =====

    #[instrument(skip(self, input))]
    pub async fn create_consultation_room(&self, input: ConsultationRoomInput) -> StoreResult<ConsultationRoom> {
        let name = required(input.name, "name")?;
        let room_number = required(input.room_number, "room_number")?;
        self.ensure_unique("consultation_rooms", "name", &name, None, "consultation room with this name already exists.")
            .await?;
        self.ensure_unique(
            "consultation_rooms",
            "room_number",
            &room_number,
            None,
            "consultation room with this room number already exists.",
        )
        .await?;
        let clinic_id = input.clinic_id.flatten();
        if let Some(clinic) = clinic_id {
            self.ensure_exists("clinics", clinic, "clinic").await?;
        }

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO consultation_rooms (name, room_number, clinic_id, location, floor, specialty, status, capacity,
                is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(&room_number)
        .bind(clinic_id)
        .bind(input.location.unwrap_or_default())
        .bind(input.floor.unwrap_or_default())
        .bind(input.specialty.unwrap_or_default())
        .bind(input.status.unwrap_or_default())
        .bind(input.capacity.unwrap_or(1))
        .bind(input.is_active.unwrap_or(true))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(room_id = id, room_number = %room_number, "Consultation room created");
        self.get_consultation_room(id).await
    }

    pub async fn get_consultation_room(&self, id: i64) -> StoreResult<ConsultationRoom> {
        sqlx::query_as::<_, ConsultationRoom>("SELECT * FROM consultation_rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Consultation room"))
    }

    /// Active rooms only.
    #[instrument(skip(self, filter, params))]
    pub async fn list_consultation_rooms(
        &self,
        filter: &ConsultationRoomFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<ConsultationRoom>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            "cr.*",
            "FROM consultation_rooms cr WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &ROOM_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_consultation_room(
        &self,
        id: i64,
        input: ConsultationRoomInput,
    ) -> StoreResult<ConsultationRoom> {
        let mut room = self.get_consultation_room(id).await?;
        if let Some(name) = input.name {
            self.ensure_unique(
                "consultation_rooms",
                "name",
                &name,
                Some(id),
                "consultation room with this name already exists.",
            )
            .await?;
            room.name = name;
        }
        if let Some(number) = input.room_number {
            self.ensure_unique(
                "consultation_rooms",
                "room_number",
                &number,
                Some(id),
                "consultation room with this room number already exists.",
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
        if let Some(v) = input.location {
            room.location = v;
        }
        if let Some(v) = input.floor {
            room.floor = v;
        }
        if let Some(v) = input.specialty {
            room.specialty = v;
        }
        if let Some(v) = input.status {
            room.status = v;
        }
        if let Some(v) = input.capacity {
            room.capacity = v;
        }
        if let Some(v) = input.is_active {
            room.is_active = v;
        }

        sqlx::query(
            "UPDATE consultation_rooms SET name = ?, room_number = ?, clinic_id = ?, location = ?, floor = ?,
                specialty = ?, status = ?, capacity = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&room.name)
        .bind(&room.room_number)
        .bind(room.clinic_id)
        .bind(&room.location)
        .bind(&room.floor)
        .bind(&room.specialty)
        .bind(room.status)
        .bind(room.capacity)
        .bind(room.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_consultation_room(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_consultation_room(&self, id: i64) -> StoreResult<()> {
        let in_use: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM consultation_sessions WHERE room_id = ?)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if in_use {
            return Err(StoreError::Conflict(
                "Cannot delete a consultation room that has recorded sessions.".into(),
            ));
        }
        let result = sqlx::query("DELETE FROM consultation_rooms WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Consultation room"));
        }
        Ok(())
    }

    /// Waiting patients for a room, head of the queue first.
    #[instrument(skip(self))]
    pub async fn room_queue(&self, room_id: i64) -> StoreResult<Vec<QueueEntry>> {
        self.get_consultation_room(room_id).await?;
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {} {QUEUE_FROM} AND q.room_id = ? AND q.is_active = 1 ORDER BY q.priority, q.queued_at, q.id",
            queue_columns()
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Calls the first waiting patient of a room.
    #[instrument(skip(self))]
    pub async fn call_next(&self, room_id: i64) -> StoreResult<QueueEntry> {
        // Entries called by someone else since the read are skipped.
        for head in self.room_queue(room_id).await? {
            match self.call_queue_entry(head.id).await {
                Err(StoreError::InvalidTransition { .. }) => continue,
                called => return called,
            }
        }
        Err(StoreError::NotFound("Waiting patient"))
    }

    // ===== Queue =====

    #[instrument(skip(self, input), fields(room_id = input.room_id, patient_id = input.patient_id))]
    pub async fn enqueue(&self, input: NewQueueEntry) -> StoreResult<QueueEntry> {
        self.ensure_exists("consultation_rooms", input.room_id, "room").await?;
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        let derived = match input.visit_id {
            Some(visit_id) => match self.get_visit(visit_id).await {
                Ok(visit) => visit.visit_type.queue_priority(),
                Err(StoreError::NotFound(_)) => {
                    return Err(StoreError::field(
                        "visit",
                        format!("Invalid pk \"{visit_id}\" - object does not exist."),
                    ))
                }
                Err(e) => return Err(e),
            },
            None => DEFAULT_QUEUE_PRIORITY,
        };

        let waiting: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM consultation_queue WHERE room_id = ? AND patient_id = ? AND is_active = 1)",
        )
        .bind(input.room_id)
        .bind(input.patient_id)
        .fetch_one(&self.pool)
        .await?;
        if waiting {
            return Err(StoreError::Conflict("Patient is already waiting in this room's queue.".into()));
        }

        let inserted = sqlx::query(
            "INSERT INTO consultation_queue (room_id, patient_id, visit_id, priority, notes, queued_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(input.room_id)
        .bind(input.patient_id)
        .bind(input.visit_id)
        .bind(input.priority.unwrap_or(derived))
        .bind(&input.notes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;
        let id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(e) => {
                let err = StoreError::from(e);
                if err.is_unique_violation() {
                    warn!("Concurrent enqueue lost the race for an active queue slot");
                    return Err(StoreError::Conflict("Patient is already waiting in this room's queue.".into()));
                }
                return Err(err);
            }
        };

        info!(id, "Patient queued");
        self.get_queue_entry(id).await
    }

    pub async fn get_queue_entry(&self, id: i64) -> StoreResult<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>(&format!("SELECT {} {QUEUE_FROM} AND q.id = ?", queue_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Queue entry"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_queue(
        &self,
        filter: &QueueFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<QueueEntry>> {
        self.fetch_page(
            &queue_columns(),
            QUEUE_FROM,
            |qb| filter.push(qb),
            &QUEUE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_queue_entry(&self, id: i64, update: QueueEntryUpdate) -> StoreResult<QueueEntry> {
        let mut entry = self.get_queue_entry(id).await?;
        if let Some(v) = update.priority {
            entry.priority = v;
        }
        if let Some(v) = update.notes {
            entry.notes = v;
        }
        if let Some(v) = update.queued_at {
            entry.queued_at = v;
        }
        if let Some(v) = update.is_active {
            entry.is_active = v;
        }
        sqlx::query("UPDATE consultation_queue SET priority = ?, notes = ?, queued_at = ?, is_active = ? WHERE id = ?")
            .bind(entry.priority)
            .bind(&entry.notes)
            .bind(entry.queued_at)
            .bind(entry.is_active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_queue_entry(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_queue_entry(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM consultation_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Queue entry"));
        }
        Ok(())
    }

    /// Marks a waiting patient as called and takes them off the queue.
    #[instrument(skip(self))]
    pub async fn call_queue_entry(&self, id: i64) -> StoreResult<QueueEntry> {
        let entry = self.get_queue_entry(id).await?;
        if !entry.is_active {
            return Err(StoreError::transition("queue entry", "call", "called"));
        }
        let updated =
            sqlx::query("UPDATE consultation_queue SET called_at = ?, is_active = 0 WHERE id = ? AND is_active = 1")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::transition("queue entry", "call", "called"));
        }
        info!(id, room_id = entry.room_id, patient_id = entry.patient_id, "Patient called");
        self.get_queue_entry(id).await
    }

    // ===== Sessions =====

    #[instrument(skip(self, input), fields(room_id = input.room_id, patient_id = input.patient_id))]
    pub async fn create_consultation_session(
        &self,
        input: NewConsultationSession,
        caller: Option<i64>,
    ) -> StoreResult<ConsultationSession> {
        self.ensure_exists("consultation_rooms", input.room_id, "room").await?;
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(doctor) = input.doctor_id {
            self.ensure_exists("users", doctor, "doctor").await?;
        }
        if let Some(visit) = input.visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let soap = input.soap;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let session_id = allocate_session_id(&mut *tx, now.date_naive()).await?;
        let id = sqlx::query(
            "INSERT INTO consultation_sessions (session_id, room_id, patient_id, doctor_id, visit_id, status,
                chief_complaint, history_of_presenting_illness, physical_examination, assessment, plan, notes,
                started_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(input.room_id)
        .bind(input.patient_id)
        .bind(input.doctor_id)
        .bind(input.visit_id)
        .bind(SessionStatus::Active)
        .bind(soap.chief_complaint.unwrap_or_default())
        .bind(soap.history_of_presenting_illness.unwrap_or_default())
        .bind(soap.physical_examination.unwrap_or_default())
        .bind(soap.assessment.unwrap_or_default())
        .bind(soap.plan.unwrap_or_default())
        .bind(soap.notes.unwrap_or_default())
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, session_id = %session_id, "Consultation session started");
        self.get_consultation_session(id).await
    }

    pub async fn get_consultation_session(&self, id: i64) -> StoreResult<ConsultationSession> {
        sqlx::query_as::<_, ConsultationSession>(&format!("SELECT {} {SESSION_FROM} AND s.id = ?", session_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Consultation session"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_consultation_sessions(
        &self,
        filter: &ConsultationSessionFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<ConsultationSession>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &session_columns(),
            SESSION_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &SESSION_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_consultation_session(
        &self,
        id: i64,
        update: ConsultationSessionUpdate,
    ) -> StoreResult<ConsultationSession> {
        let mut session = self.get_consultation_session(id).await?;
        if let Some(v) = update.status {
            session.status = v;
        }
        if let Some(doctor) = update.doctor_id {
            if let Some(doctor) = doctor {
                self.ensure_exists("users", doctor, "doctor").await?;
            }
            session.doctor_id = doctor;
        }
        apply_soap(&mut session, update.soap);

        sqlx::query(
            "UPDATE consultation_sessions SET status = ?, doctor_id = ?, chief_complaint = ?,
                history_of_presenting_illness = ?, physical_examination = ?, assessment = ?, plan = ?, notes = ?
             WHERE id = ?",
        )
        .bind(session.status)
        .bind(session.doctor_id)
        .bind(&session.chief_complaint)
        .bind(&session.history_of_presenting_illness)
        .bind(&session.physical_examination)
        .bind(&session.assessment)
        .bind(&session.plan)
        .bind(&session.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_consultation_session(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_consultation_session(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM consultation_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Consultation session"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn end_consultation_session(&self, id: i64) -> StoreResult<ConsultationSession> {
        let session = self.get_consultation_session(id).await?;
        if session.status != SessionStatus::Active {
            return Err(StoreError::transition("consultation session", "end", session.status.as_str()));
        }
        let updated = sqlx::query("UPDATE consultation_sessions SET status = ?, ended_at = ? WHERE id = ? AND status = ?")
            .bind(SessionStatus::Completed)
            .bind(Utc::now())
            .bind(id)
            .bind(SessionStatus::Active)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            let current = self.get_consultation_session(id).await?.status;
            return Err(StoreError::transition("consultation session", "end", current.as_str()));
        }
        info!(id, session_id = %session.session_id, "Consultation session ended");
        self.get_consultation_session(id).await
    }

    // ===== Referrals =====

    #[instrument(skip(self, input))]
    pub async fn create_referral(&self, input: ReferralInput, caller: Option<i64>) -> StoreResult<Referral> {
        let patient_id = required(input.patient_id, "patient")?;
        let specialty = required(input.specialty, "specialty")?;
        let facility = required(input.facility, "facility")?;
        let reason = required(input.reason, "reason")?;
        self.ensure_exists("patients", patient_id, "patient").await?;
        let visit_id = input.visit_id.flatten();
        if let Some(visit) = visit_id {
            self.ensure_exists("visits", visit, "visit").await?;
        }
        let session_id = input.session_id.flatten();
        if let Some(session) = session_id {
            self.ensure_exists("consultation_sessions", session, "session").await?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code = allocate_referral_id(&mut *tx, now.year()).await?;
        let id = sqlx::query(
            "INSERT INTO referrals (referral_id, patient_id, visit_id, session_id, referred_by, specialty, facility,
                facility_type, reason, clinical_summary, urgency, contact_person, contact_phone, contact_email,
                status, notes, referred_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(patient_id)
        .bind(visit_id)
        .bind(session_id)
        .bind(caller)
        .bind(&specialty)
        .bind(&facility)
        .bind(input.facility_type.unwrap_or_default())
        .bind(&reason)
        .bind(input.clinical_summary.unwrap_or_default())
        .bind(input.urgency.unwrap_or_default())
        .bind(input.contact_person.unwrap_or_default())
        .bind(input.contact_phone.unwrap_or_default())
        .bind(input.contact_email.unwrap_or_default())
        .bind(ReferralStatus::Draft)
        .bind(input.notes.unwrap_or_default())
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, referral_id = %code, "Referral created");
        self.get_referral(id).await
    }

    pub async fn get_referral(&self, id: i64) -> StoreResult<Referral> {
        sqlx::query_as::<_, Referral>(&format!("SELECT {} {REFERRAL_FROM} AND rf.id = ?", referral_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Referral"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_referrals(
        &self,
        filter: &ReferralFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Referral>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &referral_columns(),
            REFERRAL_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &REFERRAL_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_referral(&self, id: i64, input: ReferralInput) -> StoreResult<Referral> {
        let mut referral = self.get_referral(id).await?;
        if let Some(patient) = input.patient_id {
            self.ensure_exists("patients", patient, "patient").await?;
            referral.patient_id = patient;
        }
        if let Some(visit) = input.visit_id {
            if let Some(visit) = visit {
                self.ensure_exists("visits", visit, "visit").await?;
            }
            referral.visit_id = visit;
        }
        if let Some(session) = input.session_id {
            if let Some(session) = session {
                self.ensure_exists("consultation_sessions", session, "session").await?;
            }
            referral.session_id = session;
        }
        if let Some(v) = input.specialty {
            referral.specialty = v;
        }
        if let Some(v) = input.facility {
            referral.facility = v;
        }
        if let Some(v) = input.facility_type {
            referral.facility_type = v;
        }
        if let Some(v) = input.reason {
            referral.reason = v;
        }
        if let Some(v) = input.clinical_summary {
            referral.clinical_summary = v;
        }
        if let Some(v) = input.urgency {
            referral.urgency = v;
        }
        if let Some(v) = input.contact_person {
            referral.contact_person = v;
        }
        if let Some(v) = input.contact_phone {
            referral.contact_phone = v;
        }
        if let Some(v) = input.contact_email {
            referral.contact_email = v;
        }
        if let Some(v) = input.notes {
            referral.notes = v;
        }

        sqlx::query(
            "UPDATE referrals SET patient_id = ?, visit_id = ?, session_id = ?, specialty = ?, facility = ?,
                facility_type = ?, reason = ?, clinical_summary = ?, urgency = ?, contact_person = ?,
                contact_phone = ?, contact_email = ?, notes = ?
             WHERE id = ?",
        )
        .bind(referral.patient_id)
        .bind(referral.visit_id)
        .bind(referral.session_id)
        .bind(&referral.specialty)
        .bind(&referral.facility)
        .bind(referral.facility_type)
        .bind(&referral.reason)
        .bind(&referral.clinical_summary)
        .bind(referral.urgency)
        .bind(&referral.contact_person)
        .bind(&referral.contact_phone)
        .bind(&referral.contact_email)
        .bind(&referral.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_referral(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_referral(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM referrals WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Referral"));
        }
        Ok(())
    }

    /// Moves a referral to `status`, stamping the matching milestone the first time it is reached.
    #[instrument(skip(self, input), fields(status = input.status.as_str()))]
    pub async fn update_referral_status(&self, id: i64, input: ReferralStatusUpdate) -> StoreResult<Referral> {
        let mut referral = self.get_referral(id).await?;
        let now = Utc::now();
        match input.status {
            ReferralStatus::Accepted => {
                referral.accepted_at.get_or_insert(now);
            }
            ReferralStatus::Scheduled => {
                referral.scheduled_at.get_or_insert(now);
            }
            ReferralStatus::Completed => {
                referral.completed_at.get_or_insert(now);
            }
            _ => {}
        }
        if let Some(notes) = input.notes {
            referral.notes = notes;
        }

        sqlx::query(
            "UPDATE referrals SET status = ?, notes = ?, accepted_at = ?, scheduled_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(input.status)
        .bind(&referral.notes)
        .bind(referral.accepted_at)
        .bind(referral.scheduled_at)
        .bind(referral.completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(id, from = referral.status.as_str(), "Referral status changed");
        self.get_referral(id).await
    }
}
