use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NursingOrderStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl NursingOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NursingOrderStatus::Pending => "pending",
            NursingOrderStatus::InProgress => "in_progress",
            NursingOrderStatus::Completed => "completed",
            NursingOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_start(self) -> bool {
        self == NursingOrderStatus::Pending
    }

    /// Completion and cancellation both close an open order.
    pub fn is_open(self) -> bool {
        matches!(self, NursingOrderStatus::Pending | NursingOrderStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NursingPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NursingOrder {
    pub id: i64,
    pub order_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    pub ordered_by: Option<i64>,
    pub ordered_by_name: Option<String>,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub order_type: String,
    pub description: String,
    pub frequency: String,
    pub duration: String,
    pub status: NursingOrderStatus,
    pub priority: NursingPriority,
    pub ordered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewNursingOrder {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    pub ordered_by: Option<i64>,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    #[validate(length(min = 1, max = 100))]
    pub order_type: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub frequency: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub duration: String,
    #[serde(default)]
    pub priority: NursingPriority,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct NursingOrderUpdate {
    #[validate(length(min = 1, max = 100))]
    pub order_type: Option<String>,
    #[validate(length(min = 1))]
    pub description: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub priority: Option<NursingPriority>,
    #[serde(default, alias = "visit", with = "super::double_option")]
    pub visit_id: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NursingOrderFilter {
    pub patient: Option<i64>,
    pub ordered_by: Option<i64>,
    pub status: Option<NursingOrderStatus>,
    pub priority: Option<NursingPriority>,
    pub order_type: Option<String>,
}

// ===== Procedures =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProcedureType {
    Injection,
    Dressing,
    WoundCare,
    Catheterization,
    IvInsertion,
    Other,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Procedure {
    pub id: i64,
    pub procedure_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "nursing_order")]
    pub nursing_order_id: Option<i64>,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub procedure_type: ProcedureType,
    pub description: String,
    pub site: String,
    pub notes: String,
    pub performed_by: Option<i64>,
    pub performed_by_name: Option<String>,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewProcedure {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "nursing_order")]
    pub nursing_order_id: Option<i64>,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    pub procedure_type: ProcedureType,
    #[validate(length(min = 1))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub site: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcedureUpdate {
    pub procedure_type: Option<ProcedureType>,
    pub description: Option<String>,
    pub site: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcedureFilter {
    pub patient: Option<i64>,
    pub procedure_type: Option<ProcedureType>,
    pub performed_by: Option<i64>,
}
