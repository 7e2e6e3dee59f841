use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{
    allocate_date_scoped, optional_user_name_sql, patient_name_sql, required, user_name_sql, EhrDatabase, StoreResult,
};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::accounts::MEDICAL_DOCTOR;
use crate::models::appointment::{
    Appointment, AppointmentFilter, AppointmentSlot, AppointmentStatus, AppointmentUpdate, NewAppointment, SlotFilter,
    SlotInput,
};

const APPOINTMENT_ORDERING: Ordering = Ordering {
    fields: &[
        ("appointment_date", "a.appointment_date"),
        ("appointment_time", "a.appointment_time"),
        ("created_at", "a.created_at"),
    ],
    default: "appointment_date,appointment_time",
    tiebreak: "a.id",
};

const SLOT_ORDERING: Ordering = Ordering {
    fields: &[("day_of_week", "s.day_of_week"), ("start_time", "s.start_time")],
    default: "day_of_week,start_time",
    tiebreak: "s.id",
};

fn appointment_columns() -> String {
    format!(
        "a.*, {} AS patient_name, {} AS doctor_name, c.name AS clinic_name, r.name AS room_name",
        patient_name_sql("p"),
        optional_user_name_sql("d")
    )
}

const APPOINTMENT_FROM: &str = "FROM appointments a \
     JOIN patients p ON p.id = a.patient_id \
     LEFT JOIN users d ON d.id = a.doctor_id \
     LEFT JOIN clinics c ON c.id = a.clinic_id \
     LEFT JOIN rooms r ON r.id = a.room_id WHERE 1 = 1";

fn slot_columns() -> String {
    format!(
        "s.*, {} AS doctor_name, c.name AS clinic_name, r.name AS room_name",
        user_name_sql("d")
    )
}

const SLOT_FROM: &str = "FROM appointment_slots s \
     JOIN users d ON d.id = s.doctor_id \
     LEFT JOIN clinics c ON c.id = s.clinic_id \
     LEFT JOIN rooms r ON r.id = s.room_id WHERE 1 = 1";

impl AppointmentFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(patient) = self.patient {
            qb.push(" AND a.patient_id = ").push_bind(patient);
        }
        if let Some(doctor) = self.doctor {
            qb.push(" AND a.doctor_id = ").push_bind(doctor);
        }
        if let Some(clinic) = self.clinic {
            qb.push(" AND a.clinic_id = ").push_bind(clinic);
        }
        if let Some(status) = self.status {
            qb.push(" AND a.status = ").push_bind(status);
        }
        if let Some(kind) = self.appointment_type {
            qb.push(" AND a.appointment_type = ").push_bind(kind);
        }
        push_search(qb, search, &["a.appointment_id", "a.reason", "a.notes"]);
    }
}

impl SlotFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(doctor) = self.doctor {
            qb.push(" AND s.doctor_id = ").push_bind(doctor);
        }
        if let Some(clinic) = self.clinic {
            qb.push(" AND s.clinic_id = ").push_bind(clinic);
        }
        if let Some(day) = self.day_of_week {
            qb.push(" AND s.day_of_week = ").push_bind(day);
        }
        if let Some(available) = self.is_available {
            qb.push(" AND s.is_available = ").push_bind(available);
        }
    }
}

/// A recurring appointment names its pattern and cannot stop before it starts.
fn check_recurrence(
    appointment_date: NaiveDate,
    recurring: bool,
    pattern: &str,
    until: Option<NaiveDate>,
) -> StoreResult<()> {
    if recurring && pattern.is_empty() {
        return Err(StoreError::field(
            "recurrence_pattern",
            "A recurring appointment needs a recurrence pattern.",
        ));
    }
    if until.is_some_and(|end| end < appointment_date) {
        return Err(StoreError::field(
            "recurrence_end_date",
            "Recurrence must end on or after the appointment date.",
        ));
    }
    Ok(())
}

impl EhrDatabase {
    /// Only Medical Doctors take appointments and publish slots.
    async fn ensure_doctor(&self, id: i64) -> StoreResult<()> {
        let role: Option<String> = sqlx::query_scalar("SELECT system_role FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match role {
            None => Err(StoreError::field("doctor", format!("Invalid pk \"{id}\" - object does not exist."))),
            Some(role) if role != MEDICAL_DOCTOR => {
                Err(StoreError::field("doctor", "Selected user is not a Medical Doctor."))
            }
            Some(_) => Ok(()),
        }
    }

    async fn ensure_place(&self, clinic: Option<i64>, room: Option<i64>) -> StoreResult<()> {
        if let Some(clinic) = clinic {
            self.ensure_exists("clinics", clinic, "clinic").await?;
        }
        if let Some(room) = room {
            self.ensure_exists("rooms", room, "room").await?;
        }
        Ok(())
    }

    // ===== Appointments =====

    #[instrument(skip(self, input), fields(patient_id = input.patient_id, date = %input.appointment_date))]
    pub async fn create_appointment(&self, input: NewAppointment, caller: Option<i64>) -> StoreResult<Appointment> {
        self.ensure_exists("patients", input.patient_id, "patient").await?;
        if let Some(doctor) = input.doctor_id {
            self.ensure_doctor(doctor).await?;
        }
        self.ensure_place(input.clinic_id, input.room_id).await?;
        check_recurrence(
            input.appointment_date,
            input.is_recurring,
            &input.recurrence_pattern,
            input.recurrence_end_date,
        )?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let code =
            allocate_date_scoped(&mut *tx, "appointments", "appointment_id", "APT", now.date_naive(), "appointment ID")
                .await?;
        let id = sqlx::query(
            "INSERT INTO appointments (appointment_id, patient_id, doctor_id, clinic_id, room_id, appointment_type,
                status, appointment_date, appointment_time, duration_minutes, reason, notes, is_recurring,
                recurrence_pattern, recurrence_end_date, created_at, updated_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(input.patient_id)
        .bind(input.doctor_id)
        .bind(input.clinic_id)
        .bind(input.room_id)
        .bind(input.appointment_type)
        .bind(AppointmentStatus::Scheduled)
        .bind(input.appointment_date)
        .bind(input.appointment_time)
        .bind(input.duration_minutes)
        .bind(&input.reason)
        .bind(&input.notes)
        .bind(input.is_recurring)
        .bind(&input.recurrence_pattern)
        .bind(input.recurrence_end_date)
        .bind(now)
        .bind(now)
        .bind(caller)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        info!(id, appointment_id = %code, "Appointment scheduled");
        self.get_appointment(id).await
    }

    pub async fn get_appointment(&self, id: i64) -> StoreResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!("SELECT {} {APPOINTMENT_FROM} AND a.id = ?", appointment_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Appointment"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Appointment>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &appointment_columns(),
            APPOINTMENT_FROM,
            |qb| filter.push(qb, search.as_deref()),
            &APPOINTMENT_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    /// Scheduled or confirmed appointments from `from` onwards, soonest first.
    #[instrument(skip(self))]
    pub async fn upcoming_appointments(&self, from: NaiveDate) -> StoreResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {} {APPOINTMENT_FROM} AND a.appointment_date >= ? AND a.status IN (?, ?)
             ORDER BY a.appointment_date, a.appointment_time, a.id",
            appointment_columns()
        ))
        .bind(from)
        .bind(AppointmentStatus::Scheduled)
        .bind(AppointmentStatus::Confirmed)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every appointment on `date` whatever its status.
    #[instrument(skip(self))]
    pub async fn appointments_on(&self, date: NaiveDate) -> StoreResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {} {APPOINTMENT_FROM} AND a.appointment_date = ? ORDER BY a.appointment_time, a.id",
            appointment_columns()
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self, update))]
    pub async fn update_appointment(&self, id: i64, update: AppointmentUpdate) -> StoreResult<Appointment> {
        let before = self.get_appointment(id).await?;
        if before.status.is_closed() {
            return Err(StoreError::transition("appointment", "update", before.status.as_str()));
        }
        let mut appointment = before.clone();
        update.apply(&mut appointment);
        if appointment.doctor_id != before.doctor_id {
            if let Some(doctor) = appointment.doctor_id {
                self.ensure_doctor(doctor).await?;
            }
        }
        let clinic = appointment.clinic_id.filter(|_| appointment.clinic_id != before.clinic_id);
        let room = appointment.room_id.filter(|_| appointment.room_id != before.room_id);
        self.ensure_place(clinic, room).await?;
        check_recurrence(
            appointment.appointment_date,
            appointment.is_recurring,
            &appointment.recurrence_pattern,
            appointment.recurrence_end_date,
        )?;

        let updated = sqlx::query(
            "UPDATE appointments SET doctor_id = ?, clinic_id = ?, room_id = ?, appointment_type = ?, status = ?,
                appointment_date = ?, appointment_time = ?, duration_minutes = ?, reason = ?, notes = ?,
                is_recurring = ?, recurrence_pattern = ?, recurrence_end_date = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(appointment.doctor_id)
        .bind(appointment.clinic_id)
        .bind(appointment.room_id)
        .bind(appointment.appointment_type)
        .bind(appointment.status)
        .bind(appointment.appointment_date)
        .bind(appointment.appointment_time)
        .bind(appointment.duration_minutes)
        .bind(&appointment.reason)
        .bind(&appointment.notes)
        .bind(appointment.is_recurring)
        .bind(&appointment.recurrence_pattern)
        .bind(appointment.recurrence_end_date)
        .bind(Utc::now())
        .bind(id)
        .bind(before.status)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(self.appointment_moved(id, "update").await);
        }

        info!(id, status = appointment.status.as_str(), "Appointment updated");
        self.get_appointment(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_appointment(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Appointment"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn confirm_appointment(&self, id: i64) -> StoreResult<Appointment> {
        let appointment = self.get_appointment(id).await?;
        if !appointment.status.can_confirm() {
            return Err(StoreError::transition("appointment", "confirm", appointment.status.as_str()));
        }
        self.set_appointment_status(&appointment, AppointmentStatus::Confirmed, "confirm")
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_appointment(&self, id: i64) -> StoreResult<Appointment> {
        let appointment = self.get_appointment(id).await?;
        if !appointment.status.is_pending() {
            return Err(StoreError::transition("appointment", "cancel", appointment.status.as_str()));
        }
        self.set_appointment_status(&appointment, AppointmentStatus::Cancelled, "cancel")
            .await
    }

    async fn set_appointment_status(
        &self,
        appointment: &Appointment,
        status: AppointmentStatus,
        action: &'static str,
    ) -> StoreResult<Appointment> {
        let updated = sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(appointment.id)
            .bind(appointment.status)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(self.appointment_moved(appointment.id, action).await);
        }
        info!(id = appointment.id, status = status.as_str(), "Appointment status changed");
        self.get_appointment(appointment.id).await
    }

    async fn appointment_moved(&self, id: i64, action: &'static str) -> StoreError {
        match self.get_appointment(id).await {
            Ok(appointment) => StoreError::transition("appointment", action, appointment.status.as_str()),
            Err(err) => err,
        }
    }

    // ===== Slots =====

    /// One slot per doctor, weekday and start time.
    async fn ensure_free_slot(&self, doctor: i64, day: i64, start: NaiveTime, except: Option<i64>) -> StoreResult<()> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM appointment_slots
                WHERE doctor_id = ? AND day_of_week = ? AND start_time = ? AND id <> ?)",
        )
        .bind(doctor)
        .bind(day)
        .bind(start)
        .bind(except.unwrap_or(0))
        .fetch_one(&self.pool)
        .await?;
        if taken {
            Err(StoreError::field(
                "non_field_errors",
                "The fields doctor, day_of_week, start_time must make a unique set.",
            ))
        } else {
            Ok(())
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_slot(&self, input: SlotInput) -> StoreResult<AppointmentSlot> {
        let doctor = required(input.doctor_id, "doctor")?;
        let day = required(input.day_of_week, "day_of_week")?;
        let start = required(input.start_time, "start_time")?;
        let end = required(input.end_time, "end_time")?;
        if end <= start {
            return Err(StoreError::field("end_time", "End time must be after start time."));
        }
        let clinic = input.clinic_id.flatten();
        let room = input.room_id.flatten();
        self.ensure_doctor(doctor).await?;
        self.ensure_place(clinic, room).await?;
        self.ensure_free_slot(doctor, day, start, None).await?;

        let id = sqlx::query(
            "INSERT INTO appointment_slots (doctor_id, clinic_id, room_id, day_of_week, start_time, end_time,
                duration_minutes, is_available)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(doctor)
        .bind(clinic)
        .bind(room)
        .bind(day)
        .bind(start)
        .bind(end)
        .bind(input.duration_minutes.unwrap_or(30))
        .bind(input.is_available.unwrap_or(true))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, doctor_id = doctor, day, "Appointment slot created");
        self.get_slot(id).await
    }

    pub async fn get_slot(&self, id: i64) -> StoreResult<AppointmentSlot> {
        sqlx::query_as::<_, AppointmentSlot>(&format!("SELECT {} {SLOT_FROM} AND s.id = ?", slot_columns()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Appointment slot"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_slots(
        &self,
        filter: &SlotFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<AppointmentSlot>> {
        self.fetch_page(
            &slot_columns(),
            SLOT_FROM,
            |qb| filter.push(qb),
            &SLOT_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, input))]
    pub async fn update_slot(&self, id: i64, input: SlotInput) -> StoreResult<AppointmentSlot> {
        let mut slot = self.get_slot(id).await?;
        if let Some(doctor) = input.doctor_id {
            if doctor != slot.doctor_id {
                self.ensure_doctor(doctor).await?;
            }
            slot.doctor_id = doctor;
        }
        if let Some(clinic) = input.clinic_id {
            self.ensure_place(clinic, None).await?;
            slot.clinic_id = clinic;
        }
        if let Some(room) = input.room_id {
            self.ensure_place(None, room).await?;
            slot.room_id = room;
        }
        if let Some(v) = input.day_of_week {
            slot.day_of_week = v;
        }
        if let Some(v) = input.start_time {
            slot.start_time = v;
        }
        if let Some(v) = input.end_time {
            slot.end_time = v;
        }
        if let Some(v) = input.duration_minutes {
            slot.duration_minutes = v;
        }
        if let Some(v) = input.is_available {
            slot.is_available = v;
        }
        if slot.end_time <= slot.start_time {
            return Err(StoreError::field("end_time", "End time must be after start time."));
        }
        self.ensure_free_slot(slot.doctor_id, slot.day_of_week, slot.start_time, Some(id))
            .await?;

        sqlx::query(
            "UPDATE appointment_slots SET doctor_id = ?, clinic_id = ?, room_id = ?, day_of_week = ?, start_time = ?,
                end_time = ?, duration_minutes = ?, is_available = ?
             WHERE id = ?",
        )
        .bind(slot.doctor_id)
        .bind(slot.clinic_id)
        .bind(slot.room_id)
        .bind(slot.day_of_week)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.duration_minutes)
        .bind(slot.is_available)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_slot(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_slot(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM appointment_slots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Appointment slot"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{NaiveDate, NaiveTime};

    use crate::models::appointment::{AppointmentType, NewAppointment};

    pub fn booking(patient_id: i64, doctor_id: Option<i64>, date: NaiveDate) -> NewAppointment {
        NewAppointment {
            patient_id,
            doctor_id,
            clinic_id: None,
            room_id: None,
            appointment_type: AppointmentType::FollowUp,
            appointment_date: date,
            appointment_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            duration_minutes: 30,
            reason: "Blood pressure review".into(),
            notes: String::new(),
            is_recurring: false,
            recurrence_pattern: String::new(),
            recurrence_end_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Days;

    use super::fixtures::booking;
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[actix_web::test]
    async fn booking_gets_daily_code_and_names() {
        let store = testing::store().await;
        let doctor = store.create_user(new_user("dr.okafor", "Medical Doctor")).await.unwrap();
        let patient = store.create_patient(employee("AP1"), None).await.unwrap();
        let today = Utc::now().date_naive();

        let first = store
            .create_appointment(booking(patient.id, Some(doctor.id), today), Some(doctor.id))
            .await
            .unwrap();
        let code_date = today.format("%Y%m%d").to_string();
        assert_eq!(first.appointment_id, format!("APT-{code_date}-0001"));
        assert_eq!(first.status, AppointmentStatus::Scheduled);
        assert_eq!(first.doctor_name.as_deref(), Some("dr.okafor"));
        assert_eq!(first.created_by, Some(doctor.id));
        assert_eq!(first.appointment_time, at(9, 30));

        let second = store.create_appointment(booking(patient.id, None, today), None).await.unwrap();
        assert_eq!(second.appointment_id, format!("APT-{code_date}-0002"));
    }

    #[actix_web::test]
    async fn doctor_must_hold_the_doctor_role() {
        let store = testing::store().await;
        let nurse = store.create_user(new_user("nurse.appt", "Nursing Officer")).await.unwrap();
        let patient = store.create_patient(employee("AP2"), None).await.unwrap();
        let today = Utc::now().date_naive();

        for doctor in [nurse.id, 9_999] {
            let rejected = store.create_appointment(booking(patient.id, Some(doctor), today), None).await;
            assert!(matches!(rejected, Err(StoreError::Validation(e)) if e.contains_key("doctor")));
        }
    }

    #[actix_web::test]
    async fn recurrence_needs_pattern_and_sane_end() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("AP3"), None).await.unwrap();
        let today = Utc::now().date_naive();

        let mut input = booking(patient.id, None, today);
        input.is_recurring = true;
        let missing = store.create_appointment(input.clone(), None).await;
        assert!(matches!(missing, Err(StoreError::Validation(e)) if e.contains_key("recurrence_pattern")));

        input.recurrence_pattern = "weekly".into();
        input.recurrence_end_date = today.checked_sub_days(Days::new(1));
        let backwards = store.create_appointment(input.clone(), None).await;
        assert!(matches!(backwards, Err(StoreError::Validation(e)) if e.contains_key("recurrence_end_date")));

        input.recurrence_end_date = today.checked_add_days(Days::new(28));
        let weekly = store.create_appointment(input, None).await.unwrap();
        assert!(weekly.is_recurring);
    }

    #[actix_web::test]
    async fn confirm_then_cancel_and_closed_stays_closed() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("AP4"), None).await.unwrap();
        let appointment = store
            .create_appointment(booking(patient.id, None, Utc::now().date_naive()), None)
            .await
            .unwrap();

        let confirmed = store.confirm_appointment(appointment.id).await.unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
        assert!(matches!(
            store.confirm_appointment(appointment.id).await,
            Err(StoreError::InvalidTransition { .. })
        ));

        let cancelled = store.cancel_appointment(appointment.id).await.unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert!(matches!(
            store.cancel_appointment(appointment.id).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        let edit = AppointmentUpdate { reason: Some("Rebooked".into()), ..Default::default() };
        assert!(matches!(
            store.update_appointment(appointment.id, edit).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[actix_web::test]
    async fn racing_confirm_and_cancel_settle_once() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("AP5"), None).await.unwrap();
        let appointment = store
            .create_appointment(booking(patient.id, None, Utc::now().date_naive()), None)
            .await
            .unwrap();

        let (confirmed, cancelled) =
            futures::join!(store.confirm_appointment(appointment.id), store.cancel_appointment(appointment.id));
        let settled = store.get_appointment(appointment.id).await.unwrap().status;
        match (confirmed, cancelled) {
            // Cancel also applies to a confirmed appointment.
            (Ok(_), Ok(_)) | (Err(_), Ok(_)) => assert_eq!(settled, AppointmentStatus::Cancelled),
            (Ok(_), Err(_)) => assert_eq!(settled, AppointmentStatus::Confirmed),
            (Err(a), Err(b)) => panic!("both actions failed: {a} / {b}"),
        }
    }

    #[actix_web::test]
    async fn upcoming_and_today_views() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("AP6"), None).await.unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let next_week = today.checked_add_days(Days::new(7)).unwrap();

        let past = store.create_appointment(booking(patient.id, None, yesterday), None).await.unwrap();
        let mut later = booking(patient.id, None, today);
        later.appointment_time = at(14, 0);
        let afternoon = store.create_appointment(later, None).await.unwrap();
        let morning = store.create_appointment(booking(patient.id, None, today), None).await.unwrap();
        let ahead = store.create_appointment(booking(patient.id, None, next_week), None).await.unwrap();
        store.cancel_appointment(afternoon.id).await.unwrap();

        let upcoming: Vec<i64> = store.upcoming_appointments(today).await.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(upcoming, vec![morning.id, ahead.id]);
        assert!(!upcoming.contains(&past.id));

        let on_day: Vec<i64> = store.appointments_on(today).await.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(on_day, vec![morning.id, afternoon.id]);
    }

    #[actix_web::test]
    async fn update_changes_fields_and_status() {
        let store = testing::store().await;
        let doctor = store.create_user(new_user("dr.bello", "Medical Doctor")).await.unwrap();
        let patient = store.create_patient(employee("AP7"), None).await.unwrap();
        let appointment = store
            .create_appointment(booking(patient.id, None, Utc::now().date_naive()), None)
            .await
            .unwrap();

        let update = AppointmentUpdate {
            doctor_id: Some(Some(doctor.id)),
            status: Some(AppointmentStatus::InProgress),
            duration_minutes: Some(45),
            ..Default::default()
        };
        let updated = store.update_appointment(appointment.id, update).await.unwrap();
        assert_eq!(updated.doctor_id, Some(doctor.id));
        assert_eq!(updated.status, AppointmentStatus::InProgress);
        assert_eq!(updated.duration_minutes, 45);

        let filter = AppointmentFilter { doctor: Some(doctor.id), ..Default::default() };
        let page = store
            .list_appointments(&filter, &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.count, 1);
    }

    #[actix_web::test]
    async fn slots_are_unique_per_doctor_day_and_start() {
        let store = testing::store().await;
        let doctor = store.create_user(new_user("dr.slots", "Medical Doctor")).await.unwrap();
        let monday_nine = || SlotInput {
            doctor_id: Some(doctor.id),
            day_of_week: Some(0),
            start_time: Some(at(9, 0)),
            end_time: Some(at(12, 0)),
            ..Default::default()
        };

        let slot = store.create_slot(monday_nine()).await.unwrap();
        assert_eq!(slot.duration_minutes, 30);
        assert!(slot.is_available);
        assert_eq!(slot.doctor_name, "dr.slots");

        let clash = store.create_slot(monday_nine()).await;
        assert!(matches!(clash, Err(StoreError::Validation(e)) if e.contains_key("non_field_errors")));

        let backwards = SlotInput { end_time: Some(at(8, 0)), day_of_week: Some(1), ..monday_nine() };
        let rejected = store.create_slot(backwards).await;
        assert!(matches!(rejected, Err(StoreError::Validation(e)) if e.contains_key("end_time")));

        let closed = store
            .update_slot(slot.id, SlotInput { is_available: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(!closed.is_available);
        let open = store
            .list_slots(
                &SlotFilter { is_available: Some(true), ..Default::default() },
                &ListParams::default(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(open.count, 0);

        store.delete_slot(slot.id).await.unwrap();
        assert!(matches!(store.get_slot(slot.id).await, Err(StoreError::NotFound(_))));
    }
}
