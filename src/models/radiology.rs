use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

pub use super::laboratory::{OrderPriority, ProcessingMethod, ResultPriority, ResultStatus};

pub const CRITICAL_FINDING_PREFIX: &str = "[CRITICAL FINDING]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StudyStatus {
    #[default]
    Pending,
    Scheduled,
    Acquired,
    Processing,
    Reported,
    Verified,
}

impl StudyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudyStatus::Pending => "pending",
            StudyStatus::Scheduled => "scheduled",
            StudyStatus::Acquired => "acquired",
            StudyStatus::Processing => "processing",
            StudyStatus::Reported => "reported",
            StudyStatus::Verified => "verified",
        }
    }

    pub fn can_schedule(self) -> bool {
        matches!(self, StudyStatus::Pending | StudyStatus::Scheduled)
    }

    pub fn can_acquire(self) -> bool {
        matches!(self, StudyStatus::Pending | StudyStatus::Scheduled)
    }

    pub fn can_report(self) -> bool {
        matches!(self, StudyStatus::Acquired | StudyStatus::Processing)
    }

    /// Verification and rejection both act on a reported study.
    pub fn awaits_review(self) -> bool {
        self == StudyStatus::Reported
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RadiologyStudy {
    pub id: i64,
    #[serde(rename = "order")]
    pub order_id: i64,
    pub procedure: String,
    pub body_part: String,
    pub modality: String,
    pub status: StudyStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<NaiveTime>,
    pub scheduled_by: Option<i64>,
    pub processing_method: Option<ProcessingMethod>,
    pub outsourced_facility: String,
    pub images_count: i64,
    pub technical_notes: String,
    pub acquired_by: Option<i64>,
    pub acquired_by_name: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub report: String,
    pub findings: String,
    pub impression: String,
    pub recommendations: String,
    pub reported_by: Option<i64>,
    pub reported_by_name: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
    pub verified_by: Option<i64>,
    pub verified_by_name: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RadiologyOrder {
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
    pub studies: Vec<RadiologyStudy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewStudy {
    #[validate(length(min = 1, max = 200))]
    pub procedure: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub body_part: String,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub modality: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewRadiologyOrder {
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
    #[validate(length(min = 1, message = "At least one study is required."))]
    #[validate]
    pub studies: Vec<NewStudy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RadiologyOrderUpdate {
    pub priority: Option<OrderPriority>,
    pub clinic: Option<String>,
    pub clinical_notes: Option<String>,
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(default, alias = "visit", with = "super::double_option")]
    pub visit_id: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RadiologyOrderFilter {
    pub patient: Option<i64>,
    pub doctor: Option<i64>,
    pub priority: Option<OrderPriority>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleStudy {
    pub study_id: i64,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Option<NaiveTime>,
}

#[derive(Debug, Deserialize)]
pub struct AcquireStudy {
    pub study_id: i64,
    pub processing_method: ProcessingMethod,
    #[serde(default)]
    pub outsourced_facility: String,
    #[serde(default)]
    pub images_count: i64,
    #[serde(default)]
    pub technical_notes: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportStudy {
    pub study_id: i64,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub findings: String,
    #[serde(default)]
    pub impression: String,
    #[serde(default)]
    pub recommendations: String,
    #[serde(default)]
    pub critical: bool,
}

impl ReportStudy {
    /// Report text as stored, flagged when the finding is critical.
    pub fn report_text(&self) -> String {
        if self.critical {
            format!("{CRITICAL_FINDING_PREFIX}{}", self.report)
        } else {
            self.report.clone()
        }
    }
}

// ===== Reports =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RadiologyReport {
    pub id: i64,
    #[serde(rename = "study")]
    pub study_id: i64,
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
    pub study_details: Option<RadiologyStudy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RadiologyReportFilter {
    pub patient: Option<i64>,
    pub overall_status: Option<ResultStatus>,
    pub priority: Option<ResultPriority>,
    /// Defaults to reports awaiting verification.
    pub study_status: Option<StudyStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyRadiologyReport {
    #[serde(default)]
    pub overall_status: ResultStatus,
    #[serde(default)]
    pub priority: ResultPriority,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRadiologyReport {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RejectedReport {
    pub message: &'static str,
    pub study: RadiologyStudy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StudyStatus::Pending, true, true, false)]
    #[test_case(StudyStatus::Scheduled, true, true, false)]
    #[test_case(StudyStatus::Acquired, false, false, true)]
    #[test_case(StudyStatus::Processing, false, false, true)]
    #[test_case(StudyStatus::Reported, false, false, false)]
    #[test_case(StudyStatus::Verified, false, false, false)]
    fn study_actions(status: StudyStatus, schedule: bool, acquire: bool, report: bool) {
        assert_eq!(status.can_schedule(), schedule);
        assert_eq!(status.can_acquire(), acquire);
        assert_eq!(status.can_report(), report);
    }

    #[test]
    fn critical_reports_are_flagged() {
        let mut input = ReportStudy {
            study_id: 1,
            report: "Mass in left lobe".into(),
            findings: String::new(),
            impression: String::new(),
            recommendations: String::new(),
            critical: true,
        };
        assert_eq!(input.report_text(), "[CRITICAL FINDING]\n\nMass in left lobe");
        input.critical = false;
        assert_eq!(input.report_text(), "Mass in left lobe");
    }
}
