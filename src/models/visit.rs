use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VisitType {
    #[default]
    Consultation,
    FollowUp,
    Emergency,
    Routine,
}

impl VisitType {
    /// Queue priority, lowest first.
    pub fn queue_priority(self) -> i64 {
        match self {
            VisitType::Emergency => 0,
            VisitType::FollowUp => 1,
            VisitType::Consultation => 2,
            VisitType::Routine => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VisitStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub visit_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    pub visit_type: VisitType,
    pub status: VisitStatus,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub clinic: String,
    pub location: Option<String>,
    #[serde(rename = "doctor")]
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    pub chief_complaint: String,
    pub clinical_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewVisit {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(default)]
    pub visit_type: VisitType,
    #[serde(default)]
    pub status: VisitStatus,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub clinic: String,
    pub location: Option<String>,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(default)]
    pub chief_complaint: String,
    #[serde(default)]
    pub clinical_notes: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct VisitUpdate {
    pub visit_type: Option<VisitType>,
    pub status: Option<VisitStatus>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    #[validate(length(max = 100))]
    pub clinic: Option<String>,
    pub location: Option<String>,
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    pub chief_complaint: Option<String>,
    pub clinical_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VisitFilter {
    pub patient: Option<i64>,
    pub status: Option<VisitStatus>,
    pub visit_type: Option<VisitType>,
    pub clinic: Option<String>,
}

// ===== Vitals =====

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BmiError {
    #[error("Height must be between 30 and 300 cm. Got: {0} cm")]
    Height(f64),
    #[error("Weight must be between 1 and 500 kg. Got: {0} kg")]
    Weight(f64),
}

impl BmiError {
    pub fn field(&self) -> &'static str {
        match self {
            BmiError::Height(_) => "height",
            BmiError::Weight(_) => "weight",
        }
    }
}

/// BMI from weight (kg) and height (cm), rounded to two places and capped at 999.99.
/// Missing or zero measurements yield no BMI.
pub fn compute_bmi(weight: Option<f64>, height: Option<f64>) -> Result<Option<f64>, BmiError> {
    let (Some(weight), Some(height)) = (weight, height) else {
        return Ok(None);
    };
    if weight == 0.0 || height == 0.0 {
        return Ok(None);
    }
    if !(30.0..=300.0).contains(&height) {
        return Err(BmiError::Height(height));
    }
    if !(1.0..=500.0).contains(&weight) {
        return Err(BmiError::Weight(weight));
    }
    let meters = height / 100.0;
    let bmi = (weight / (meters * meters) * 100.0).round() / 100.0;
    Ok(Some(bmi.min(999.99)))
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VitalReading {
    pub id: i64,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    pub temperature: Option<f64>,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub heart_rate: Option<i64>,
    pub respiratory_rate: Option<i64>,
    pub oxygen_saturation: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub bmi: Option<f64>,
    pub notes: String,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: Option<i64>,
    pub recorded_by_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct VitalsInput {
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    #[serde(alias = "patient")]
    pub patient_id: Option<i64>,
    pub temperature: Option<f64>,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub heart_rate: Option<i64>,
    pub respiratory_rate: Option<i64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub oxygen_saturation: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VitalsFilter {
    pub patient: Option<i64>,
    pub visit: Option<i64>,
}
