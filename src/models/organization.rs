use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

pub const STANDARD_CLINICS: [&str; 5] = ["General", "Physiotherapy", "Eye Clinic", "Sickle Cell", "Diamond"];

const CLINIC_VARIATIONS: [(&str, &str); 12] = [
    ("eye", "Eye Clinic"),
    ("eye clinic", "Eye Clinic"),
    ("ophthalmology", "Eye Clinic"),
    ("sickle cell", "Sickle Cell"),
    ("sickle cell clinic", "Sickle Cell"),
    ("diamond", "Diamond"),
    ("diamond club", "Diamond"),
    ("diamond club clinic", "Diamond"),
    ("physiotherapy", "Physiotherapy"),
    ("physiotherapy clinic", "Physiotherapy"),
    ("general", "General"),
    ("general clinic", "General"),
];

/// Canonical clinic name; blank input means General and unknown names are
/// returned with only the first letter uppercased.
pub fn normalize_clinic_name(clinic: Option<&str>) -> String {
    let trimmed = clinic.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return "General".to_string();
    }

    let lower = trimmed.to_lowercase();
    if let Some(standard) = STANDARD_CLINICS.iter().find(|s| s.to_lowercase() == lower) {
        return standard.to_string();
    }
    if let Some((_, canonical)) = CLINIC_VARIATIONS.iter().find(|(v, _)| *v == lower) {
        return canonical.to_string();
    }

    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RoomType {
    #[default]
    Consultation,
    Procedure,
    Emergency,
    Examination,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

// ===== Clinics =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Clinic {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    pub location: String,
    pub phone: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ClinicInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClinicFilter {
    pub is_active: Option<bool>,
}

// ===== Departments =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Department {
    pub id: i64,
    #[serde(rename = "clinic")]
    pub clinic_id: i64,
    pub clinic_name: String,
    pub name: String,
    pub code: String,
    pub description: String,
    #[serde(rename = "head")]
    pub head_id: Option<i64>,
    pub head_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DepartmentInput {
    #[serde(alias = "clinic")]
    pub clinic_id: Option<i64>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    pub description: Option<String>,
    #[serde(default, alias = "head", with = "super::double_option")]
    pub head_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DepartmentFilter {
    pub clinic: Option<i64>,
    pub is_active: Option<bool>,
}

// ===== Rooms =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub room_number: String,
    #[serde(rename = "clinic")]
    pub clinic_id: Option<i64>,
    pub clinic_name: Option<String>,
    #[serde(rename = "department")]
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub room_type: RoomType,
    pub location: String,
    pub floor: String,
    pub specialty: String,
    pub capacity: i64,
    pub status: RoomStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RoomInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub room_number: Option<String>,
    #[serde(default, alias = "clinic", with = "super::double_option")]
    pub clinic_id: Option<Option<i64>>,
    #[serde(default, alias = "department", with = "super::double_option")]
    pub department_id: Option<Option<i64>>,
    pub room_type: Option<RoomType>,
    pub location: Option<String>,
    pub floor: Option<String>,
    pub specialty: Option<String>,
    #[validate(range(min = 1))]
    pub capacity: Option<i64>,
    pub status: Option<RoomStatus>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomFilter {
    pub clinic: Option<i64>,
    pub department: Option<i64>,
    pub room_type: Option<RoomType>,
    pub status: Option<RoomStatus>,
    pub is_active: Option<bool>,
}
