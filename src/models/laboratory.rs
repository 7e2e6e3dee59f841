use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderPriority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProcessingMethod {
    InHouse,
    Outsourced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LabTestStatus {
    #[default]
    Pending,
    SampleCollected,
    Processing,
    ResultsReady,
    Verified,
}

impl LabTestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LabTestStatus::Pending => "pending",
            LabTestStatus::SampleCollected => "sample_collected",
            LabTestStatus::Processing => "processing",
            LabTestStatus::ResultsReady => "results_ready",
            LabTestStatus::Verified => "verified",
        }
    }

    /// Tests move one step at a time.
    pub fn next(self) -> Option<LabTestStatus> {
        match self {
            LabTestStatus::Pending => Some(LabTestStatus::SampleCollected),
            LabTestStatus::SampleCollected => Some(LabTestStatus::Processing),
            LabTestStatus::Processing => Some(LabTestStatus::ResultsReady),
            LabTestStatus::ResultsReady => Some(LabTestStatus::Verified),
            LabTestStatus::Verified => None,
        }
    }

    pub fn can_become(self, target: LabTestStatus) -> bool {
        self.next() == Some(target)
    }
}

/// Classification given when a result is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Normal,
    Abnormal,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ResultPriority {
    Low,
    #[default]
    Medium,
    High,
}

// ===== Templates =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LabTemplate {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub sample_type: String,
    pub description: String,
    pub normal_range: Json<Map<String, Value>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct LabTemplateInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub sample_type: Option<String>,
    pub description: Option<String>,
    pub normal_range: Option<Map<String, Value>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabTemplateFilter {
    pub sample_type: Option<String>,
    pub is_active: Option<bool>,
}

// ===== Orders and tests =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LabTest {
    pub id: i64,
    #[serde(rename = "order")]
    pub order_id: i64,
    #[serde(rename = "template")]
    pub template_id: Option<i64>,
    pub template_name: Option<String>,
    pub name: String,
    pub code: String,
    pub sample_type: String,
    pub status: LabTestStatus,
    pub processing_method: Option<ProcessingMethod>,
    pub outsourced_lab: String,
    pub collected_by: Option<i64>,
    pub collected_by_name: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub processed_by: Option<i64>,
    pub processed_by_name: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub results: Json<Map<String, Value>>,
    pub notes: String,
    pub verified_by: Option<i64>,
    pub verified_by_name: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LabOrder {
    pub id: i64,
    pub order_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "doctor")]
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub priority: OrderPriority,
    pub clinic: String,
    pub clinical_notes: String,
    pub ordered_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    #[sqlx(skip)]
    pub tests: Vec<LabTest>,
}

/// One requested test; a template fills in whatever is left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewLabTest {
    #[serde(alias = "template")]
    pub template_id: Option<i64>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub sample_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewLabOrder {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    #[serde(default)]
    pub priority: OrderPriority,
    #[serde(default)]
    pub clinic: String,
    #[serde(default)]
    pub clinical_notes: String,
    #[validate(length(min = 1, message = "At least one test is required."))]
    #[validate]
    pub tests: Vec<NewLabTest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabOrderUpdate {
    pub priority: Option<OrderPriority>,
    pub clinic: Option<String>,
    pub clinical_notes: Option<String>,
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(default, alias = "visit", with = "super::double_option")]
    pub visit_id: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabOrderFilter {
    pub patient: Option<i64>,
    pub doctor: Option<i64>,
    pub priority: Option<OrderPriority>,
    /// Orders with at least one test in this status.
    pub status: Option<LabTestStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabTestFilter {
    pub order: Option<i64>,
    pub status: Option<LabTestStatus>,
    pub processing_method: Option<ProcessingMethod>,
}

#[derive(Debug, Deserialize)]
pub struct CollectSample {
    pub test_id: i64,
    #[serde(default)]
    pub collection_method: String,
    #[serde(default)]
    pub notes: String,
}

impl CollectSample {
    /// `Method: ...` and `Notes: ...` lines, skipping blanks.
    pub fn notes_text(&self) -> Option<String> {
        let mut lines = Vec::new();
        if !self.collection_method.is_empty() {
            lines.push(format!("Method: {}", self.collection_method));
        }
        if !self.notes.is_empty() {
            lines.push(format!("Notes: {}", self.notes));
        }
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessTest {
    pub test_id: i64,
    pub processing_method: ProcessingMethod,
    #[serde(default)]
    pub outsourced_lab: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResults {
    pub test_id: i64,
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default)]
    pub notes: String,
}

// ===== Results =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LabResult {
    pub id: i64,
    #[serde(rename = "test")]
    pub test_id: i64,
    #[serde(rename = "order")]
    pub order_pk: i64,
    pub order_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    pub overall_status: Option<ResultStatus>,
    pub priority: ResultPriority,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub test_details: Option<LabTest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyLabResult {
    #[serde(default)]
    pub overall_status: ResultStatus,
    #[serde(default)]
    pub priority: ResultPriority,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabResultFilter {
    pub patient: Option<i64>,
    pub overall_status: Option<ResultStatus>,
    pub priority: Option<ResultPriority>,
}
