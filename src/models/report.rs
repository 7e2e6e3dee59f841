use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::pharmacy::AlertSummary;

pub type Counts = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub format: ReportFormat,
}

pub const AGE_GROUPS: [&str; 5] = ["0-18", "19-35", "36-50", "51-65", "65+"];

/// Bucket label for an age in whole years.
pub fn age_group(age: i32) -> &'static str {
    match age {
        i32::MIN..=18 => AGE_GROUPS[0],
        19..=35 => AGE_GROUPS[1],
        36..=50 => AGE_GROUPS[2],
        51..=65 => AGE_GROUPS[3],
        _ => AGE_GROUPS[4],
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatientDemographics {
    pub total_patients: i64,
    pub by_category: Counts,
    pub by_gender: Counts,
    pub by_age_group: Counts,
    pub by_blood_group: Counts,
}

impl PatientDemographics {
    /// `Metric,Value` rows with section counts flattened to `{section}_{key}`.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Metric,Value\r\n");
        let _ = write!(out, "total_patients,{}\r\n", self.total_patients);
        let sections = [
            ("by_category", &self.by_category),
            ("by_gender", &self.by_gender),
            ("by_age_group", &self.by_age_group),
            ("by_blood_group", &self.by_blood_group),
        ];
        for (section, counts) in sections {
            for (key, value) in counts {
                let _ = write!(out, "{section}_{key},{value}\r\n");
            }
        }
        out
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LabStatisticsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LabStatistics {
    pub total_orders: i64,
    pub by_priority: Counts,
    pub by_status: Counts,
    pub tests_completed: i64,
    pub tests_pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PharmacyStatistics {
    pub total_prescriptions: i64,
    pub by_status: Counts,
    pub total_dispenses: i64,
    pub dispensed_today: i64,
    pub inventory_alerts: AlertSummary,
}

// ===== Dashboard =====

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatientStats {
    pub total: i64,
    pub by_category: Counts,
    pub new_today: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VisitStats {
    pub total_today: i64,
    pub scheduled: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderQueueStats {
    pub pending_orders: i64,
    pub pending_verification: i64,
    pub completed_today: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PharmacyQueueStats {
    pub pending_prescriptions: i64,
    pub dispensed_today: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsultationStats {
    pub active_sessions: i64,
    pub completed_today: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NursingStats {
    pub pending_orders: i64,
    pub in_progress: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    pub patients: PatientStats,
    pub visits: VisitStats,
    pub laboratory: OrderQueueStats,
    pub pharmacy: PharmacyQueueStats,
    pub radiology: OrderQueueStats,
    pub consultation: ConsultationStats,
    pub nursing: NursingStats,
}
