use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

pub use super::organization::RoomStatus;

// ===== Rooms =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConsultationRoom {
    pub id: i64,
    pub name: String,
    pub room_number: String,
    #[serde(rename = "clinic")]
    pub clinic_id: Option<i64>,
    pub location: String,
    pub floor: String,
    pub specialty: String,
    pub status: RoomStatus,
    pub capacity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ConsultationRoomInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub room_number: Option<String>,
    #[serde(default, alias = "clinic", with = "super::double_option")]
    pub clinic_id: Option<Option<i64>>,
    pub location: Option<String>,
    pub floor: Option<String>,
    pub specialty: Option<String>,
    pub status: Option<RoomStatus>,
    #[validate(range(min = 1))]
    pub capacity: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsultationRoomFilter {
    pub status: Option<RoomStatus>,
    pub specialty: Option<String>,
}

// ===== Sessions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConsultationSession {
    pub id: i64,
    pub session_id: String,
    #[serde(rename = "room")]
    pub room_id: i64,
    pub room_name: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "doctor")]
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub status: SessionStatus,
    pub chief_complaint: String,
    pub history_of_presenting_illness: String,
    pub physical_examination: String,
    pub assessment: String,
    pub plan: String,
    pub notes: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

/// SOAP notes shared by session create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoapNotes {
    pub chief_complaint: Option<String>,
    pub history_of_presenting_illness: Option<String>,
    pub physical_examination: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewConsultationSession {
    #[serde(alias = "room")]
    pub room_id: i64,
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    #[serde(flatten)]
    pub soap: SoapNotes,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsultationSessionUpdate {
    pub status: Option<SessionStatus>,
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(flatten)]
    pub soap: SoapNotes,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsultationSessionFilter {
    pub room: Option<i64>,
    pub patient: Option<i64>,
    pub doctor: Option<i64>,
    pub status: Option<SessionStatus>,
}

// ===== Queue =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QueueEntry {
    pub id: i64,
    #[serde(rename = "room")]
    pub room_id: i64,
    pub room_name: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub priority: i64,
    pub notes: String,
    pub queued_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewQueueEntry {
    #[serde(alias = "room")]
    pub room_id: i64,
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    /// Overrides the priority derived from the visit type.
    pub priority: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueEntryUpdate {
    pub priority: Option<i64>,
    pub notes: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueFilter {
    pub room: Option<i64>,
    pub patient: Option<i64>,
    pub is_active: Option<bool>,
}

/// Priority for patients queued without a visit.
pub const DEFAULT_QUEUE_PRIORITY: i64 = 3;

// ===== Referrals =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReferralStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
    Scheduled,
    Completed,
    Cancelled,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralStatus::Draft => "draft",
            ReferralStatus::Sent => "sent",
            ReferralStatus::Accepted => "accepted",
            ReferralStatus::Scheduled => "scheduled",
            ReferralStatus::Completed => "completed",
            ReferralStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReferralUrgency {
    #[default]
    Routine,
    Urgent,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FacilityType {
    #[default]
    Internal,
    External,
    Specialist,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referral_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    #[serde(rename = "session")]
    pub session_id: Option<i64>,
    pub referred_by: Option<i64>,
    pub referred_by_name: Option<String>,
    pub specialty: String,
    pub facility: String,
    pub facility_type: FacilityType,
    pub reason: String,
    pub clinical_summary: String,
    pub urgency: ReferralUrgency,
    pub contact_person: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub status: ReferralStatus,
    pub notes: String,
    pub referred_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReferralInput {
    #[serde(alias = "patient")]
    pub patient_id: Option<i64>,
    #[serde(default, alias = "visit", with = "super::double_option")]
    pub visit_id: Option<Option<i64>>,
    #[serde(default, alias = "session", with = "super::double_option")]
    pub session_id: Option<Option<i64>>,
    #[validate(length(min = 1, max = 100))]
    pub specialty: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub facility: Option<String>,
    pub facility_type: Option<FacilityType>,
    #[validate(length(min = 1))]
    pub reason: Option<String>,
    pub clinical_summary: Option<String>,
    pub urgency: Option<ReferralUrgency>,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    #[validate(email(message = "Enter a valid email address."))]
    pub contact_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReferralStatusUpdate {
    pub status: ReferralStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferralFilter {
    pub patient: Option<i64>,
    pub status: Option<ReferralStatus>,
    pub urgency: Option<ReferralUrgency>,
    pub facility_type: Option<FacilityType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_accepts_flattened_soap_notes() {
        let session: NewConsultationSession = serde_json::from_value(serde_json::json!({
            "room": 1,
            "patient": 2,
            "chief_complaint": "Headache",
            "plan": "Analgesics"
        }))
        .unwrap();
        assert_eq!(session.room_id, 1);
        assert_eq!(session.soap.chief_complaint.as_deref(), Some("Headache"));
        assert_eq!(session.soap.assessment, None);
    }

    #[test]
    fn referral_requires_valid_contact_email() {
        let input = ReferralInput { contact_email: Some("not-an-email".into()), ..Default::default() };
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("contact_email"));
    }
}
