//! Scheduled patient appointments and doctors' weekly slots.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

pub const RECURRENCE_PATTERNS: [&str; 3] = ["daily", "weekly", "monthly"];

fn validate_recurrence(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || RECURRENCE_PATTERNS.contains(&value) {
        Ok(())
    } else {
        Err(super::invalid_choice("Recurrence must be daily, weekly or monthly."))
    }
}

fn default_duration() -> i64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Scheduled or confirmed; the states listed as upcoming.
    pub fn is_pending(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn can_confirm(self) -> bool {
        self == AppointmentStatus::Scheduled
    }

    /// Completed, cancelled and missed appointments no longer change.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentType {
    #[default]
    Consultation,
    FollowUp,
    Routine,
    Emergency,
    Procedure,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Appointment {
    pub id: i64,
    pub appointment_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "doctor")]
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    #[serde(rename = "clinic")]
    pub clinic_id: Option<i64>,
    pub clinic_name: Option<String>,
    #[serde(rename = "room")]
    pub room_id: Option<i64>,
    pub room_name: Option<String>,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i64,
    pub reason: String,
    pub notes: String,
    pub is_recurring: bool,
    pub recurrence_pattern: String,
    pub recurrence_end_date: Option<NaiveDate>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewAppointment {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(alias = "clinic")]
    pub clinic_id: Option<i64>,
    #[serde(alias = "room")]
    pub room_id: Option<i64>,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    #[serde(default = "default_duration")]
    #[validate(range(min = 15, max = 480))]
    pub duration_minutes: i64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    #[validate(custom = "validate_recurrence")]
    pub recurrence_pattern: String,
    pub recurrence_end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AppointmentUpdate {
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(default, alias = "clinic", with = "super::double_option")]
    pub clinic_id: Option<Option<i64>>,
    #[serde(default, alias = "room", with = "super::double_option")]
    pub room_id: Option<Option<i64>>,
    pub appointment_type: Option<AppointmentType>,
    pub status: Option<AppointmentStatus>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    #[validate(range(min = 15, max = 480))]
    pub duration_minutes: Option<i64>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub is_recurring: Option<bool>,
    #[validate(custom = "validate_recurrence")]
    pub recurrence_pattern: Option<String>,
    #[serde(default, with = "super::double_option")]
    pub recurrence_end_date: Option<Option<NaiveDate>>,
}

impl AppointmentUpdate {
    /// Overlays the supplied fields; foreign keys are checked by the store.
    pub fn apply(self, a: &mut Appointment) {
        if let Some(v) = self.doctor_id {
            a.doctor_id = v;
        }
        if let Some(v) = self.clinic_id {
            a.clinic_id = v;
        }
        if let Some(v) = self.room_id {
            a.room_id = v;
        }
        if let Some(v) = self.appointment_type {
            a.appointment_type = v;
        }
        if let Some(v) = self.status {
            a.status = v;
        }
        if let Some(v) = self.appointment_date {
            a.appointment_date = v;
        }
        if let Some(v) = self.appointment_time {
            a.appointment_time = v;
        }
        if let Some(v) = self.duration_minutes {
            a.duration_minutes = v;
        }
        if let Some(v) = self.reason {
            a.reason = v;
        }
        if let Some(v) = self.notes {
            a.notes = v;
        }
        if let Some(v) = self.is_recurring {
            a.is_recurring = v;
        }
        if let Some(v) = self.recurrence_pattern {
            a.recurrence_pattern = v;
        }
        if let Some(v) = self.recurrence_end_date {
            a.recurrence_end_date = v;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentFilter {
    pub patient: Option<i64>,
    pub doctor: Option<i64>,
    pub clinic: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
}

// ===== Slots =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentSlot {
    pub id: i64,
    #[serde(rename = "doctor")]
    pub doctor_id: i64,
    pub doctor_name: String,
    #[serde(rename = "clinic")]
    pub clinic_id: Option<i64>,
    pub clinic_name: Option<String>,
    #[serde(rename = "room")]
    pub room_id: Option<i64>,
    pub room_name: Option<String>,
    /// 0 is Monday, 6 is Sunday.
    pub day_of_week: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
    pub is_available: bool,
}

/// Create and update body; create requires doctor, day and both times.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SlotInput {
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(default, alias = "clinic", with = "super::double_option")]
    pub clinic_id: Option<Option<i64>>,
    #[serde(default, alias = "room", with = "super::double_option")]
    pub room_id: Option<Option<i64>>,
    #[validate(range(min = 0, max = 6))]
    pub day_of_week: Option<i64>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    #[validate(range(min = 15, max = 480))]
    pub duration_minutes: Option<i64>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotFilter {
    pub doctor: Option<i64>,
    pub clinic: Option<i64>,
    pub day_of_week: Option<i64>,
    pub is_available: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(AppointmentStatus::Scheduled, true, true, false)]
    #[test_case(AppointmentStatus::Confirmed, false, true, false)]
    #[test_case(AppointmentStatus::InProgress, false, false, false)]
    #[test_case(AppointmentStatus::Completed, false, false, true)]
    #[test_case(AppointmentStatus::Cancelled, false, false, true)]
    #[test_case(AppointmentStatus::NoShow, false, false, true)]
    fn status_rules(status: AppointmentStatus, confirm: bool, pending: bool, closed: bool) {
        assert_eq!(status.can_confirm(), confirm);
        assert_eq!(status.is_pending(), pending);
        assert_eq!(status.is_closed(), closed);
    }

    #[test]
    fn new_appointment_defaults_and_bounds() {
        let input: NewAppointment = serde_json::from_value(serde_json::json!({
            "patient": 1,
            "appointment_date": "2025-06-02",
            "appointment_time": "09:30:00",
        }))
        .unwrap();
        assert_eq!(input.duration_minutes, 30);
        assert_eq!(input.appointment_type, AppointmentType::Consultation);
        assert!(input.validate().is_ok());

        let short = NewAppointment { duration_minutes: 10, ..input.clone() };
        assert!(short.validate().is_err());
        let fortnightly = NewAppointment { recurrence_pattern: "fortnightly".into(), ..input };
        assert!(fortnightly.validate().is_err());
    }

    #[test]
    fn slot_day_must_be_a_weekday_index() {
        let slot = SlotInput { day_of_week: Some(7), ..Default::default() };
        assert!(slot.validate().is_err());
        let slot = SlotInput { day_of_week: Some(6), ..Default::default() };
        assert!(slot.validate().is_ok());
    }
}
