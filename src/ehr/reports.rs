use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{EhrDatabase, StoreResult};
use crate::models::laboratory::LabTestStatus;
use crate::models::patient::{age_on, BLOOD_GROUPS};
use crate::models::pharmacy::PrescriptionStatus;
use crate::models::report::{
    age_group, ConsultationStats, Counts, DashboardStats, LabStatistics, LabStatisticsQuery, NursingStats,
    OrderQueueStats, PatientDemographics, PatientStats, PharmacyQueueStats, PharmacyStatistics, VisitStats, AGE_GROUPS,
};

const PATIENT_CATEGORIES: [&str; 4] = ["employee", "retiree", "nonnpa", "dependent"];
const GENDERS: [&str; 2] = ["male", "female"];
const ORDER_PRIORITIES: [&str; 3] = ["routine", "urgent", "stat"];
const LAB_TEST_STATUSES: [LabTestStatus; 5] = [
    LabTestStatus::Pending,
    LabTestStatus::SampleCollected,
    LabTestStatus::Processing,
    LabTestStatus::ResultsReady,
    LabTestStatus::Verified,
];
const PRESCRIPTION_STATUSES: [PrescriptionStatus; 5] = [
    PrescriptionStatus::Pending,
    PrescriptionStatus::Dispensing,
    PrescriptionStatus::PartiallyDispensed,
    PrescriptionStatus::Dispensed,
    PrescriptionStatus::Cancelled,
];

fn seeded(keys: impl IntoIterator<Item = impl Into<String>>) -> Counts {
    keys.into_iter().map(|k| (k.into(), 0)).collect()
}

impl LabStatisticsQuery {
    /// Restricts `o.ordered_at` to the requested days, both ends inclusive.
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(start) = self.start_date {
            qb.push(" AND substr(o.ordered_at, 1, 10) >= ").push_bind(start.to_string());
        }
        if let Some(end) = self.end_date {
            qb.push(" AND substr(o.ordered_at, 1, 10) <= ").push_bind(end.to_string());
        }
    }
}

impl EhrDatabase {
    /// Adds `COUNT(*)` per value of `column` into `counts`, ignoring values not already seeded.
    async fn count_into<F>(&self, counts: &mut Counts, column: &str, from_where: &str, push_filters: F) -> StoreResult<()>
    where
        F: for<'q> Fn(&mut QueryBuilder<'q, Sqlite>),
    {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {column}, COUNT(*) {from_where}"));
        push_filters(&mut qb);
        qb.push(format!(" GROUP BY {column}"));
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        for (key, count) in rows {
            if let Some(slot) = counts.get_mut(&key) {
                *slot += count;
            }
        }
        Ok(())
    }

    async fn scalar_count(&self, sql: &str, day: Option<&str>) -> StoreResult<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(day) = day {
            query = query.bind(day.to_string());
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    // ===== Reports =====

    #[instrument(skip(self))]
    pub async fn patient_demographics(&self, today: NaiveDate) -> StoreResult<PatientDemographics> {
        const ACTIVE: &str = "FROM patients WHERE is_active = 1";
        let mut report = PatientDemographics {
            total_patients: self.scalar_count(&format!("SELECT COUNT(*) {ACTIVE}"), None).await?,
            by_category: seeded(PATIENT_CATEGORIES),
            by_gender: seeded(GENDERS),
            by_age_group: seeded(AGE_GROUPS),
            by_blood_group: seeded(BLOOD_GROUPS),
        };
        self.count_into(&mut report.by_category, "category", ACTIVE, |_| {}).await?;
        self.count_into(&mut report.by_gender, "gender", ACTIVE, |_| {}).await?;
        self.count_into(&mut report.by_blood_group, "blood_group", ACTIVE, |_| {}).await?;

        let births: Vec<NaiveDate> = sqlx::query_scalar(&format!("SELECT date_of_birth {ACTIVE}"))
            .fetch_all(&self.pool)
            .await?;
        for dob in births {
            if let Some(slot) = report.by_age_group.get_mut(age_group(age_on(dob, today))) {
                *slot += 1;
            }
        }

        info!(total = report.total_patients, "Patient demographics report generated");
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn lab_statistics(&self, query: &LabStatisticsQuery) -> StoreResult<LabStatistics> {
        const ORDERS: &str = "FROM lab_orders o WHERE 1 = 1";
        const TESTS: &str = "FROM lab_tests t JOIN lab_orders o ON o.id = t.order_id WHERE 1 = 1";

        let mut total = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) {ORDERS}"));
        query.push(&mut total);
        let total_orders: i64 = total.build_query_scalar().fetch_one(&self.pool).await?;

        let mut stats = LabStatistics {
            total_orders,
            by_priority: seeded(ORDER_PRIORITIES),
            by_status: seeded(LAB_TEST_STATUSES.iter().map(|s| s.as_str())),
            ..Default::default()
        };
        self.count_into(&mut stats.by_priority, "o.priority", ORDERS, |qb| query.push(qb))
            .await?;
        self.count_into(&mut stats.by_status, "t.status", TESTS, |qb| query.push(qb))
            .await?;

        stats.tests_completed = stats.by_status.get(LabTestStatus::Verified.as_str()).copied().unwrap_or(0);
        stats.tests_pending = LAB_TEST_STATUSES
            .iter()
            .filter(|s| **s != LabTestStatus::Verified)
            .filter_map(|s| stats.by_status.get(s.as_str()))
            .sum();
        Ok(stats)
    }

    #[instrument(skip(self))]
    pub async fn pharmacy_statistics(&self, today: NaiveDate) -> StoreResult<PharmacyStatistics> {
        let mut by_status = seeded(PRESCRIPTION_STATUSES.iter().map(|s| s.as_str()));
        self.count_into(&mut by_status, "status", "FROM prescriptions WHERE 1 = 1", |_| {})
            .await?;
        let day = today.to_string();

        Ok(PharmacyStatistics {
            total_prescriptions: by_status.values().sum(),
            by_status,
            total_dispenses: self.scalar_count("SELECT COUNT(*) FROM dispenses", None).await?,
            dispensed_today: self
                .scalar_count("SELECT COUNT(*) FROM dispenses WHERE substr(dispensed_at, 1, 10) = ?", Some(&day))
                .await?,
            inventory_alerts: self.inventory_alert_summary().await?,
        })
    }

    // ===== Dashboard =====

    #[instrument(skip(self))]
    pub async fn dashboard_stats(&self) -> StoreResult<DashboardStats> {
        let day = Utc::now().date_naive().to_string();
        let today = Some(day.as_str());

        let mut patients = PatientStats {
            total: self.scalar_count("SELECT COUNT(*) FROM patients WHERE is_active = 1", None).await?,
            by_category: seeded(PATIENT_CATEGORIES),
            new_today: self
                .scalar_count("SELECT COUNT(*) FROM patients WHERE substr(created_at, 1, 10) = ?", today)
                .await?,
        };
        self.count_into(&mut patients.by_category, "category", "FROM patients WHERE is_active = 1", |_| {})
            .await?;

        let visits_by = |status: &'static str| {
            format!("SELECT COUNT(*) FROM visits WHERE date = ? AND status = '{status}'")
        };
        let visits = VisitStats {
            total_today: self.scalar_count("SELECT COUNT(*) FROM visits WHERE date = ?", today).await?,
            scheduled: self.scalar_count(&visits_by("scheduled"), today).await?,
            in_progress: self.scalar_count(&visits_by("in_progress"), today).await?,
            completed: self.scalar_count(&visits_by("completed"), today).await?,
        };

        let laboratory = OrderQueueStats {
            pending_orders: self
                .scalar_count(
                    "SELECT COUNT(DISTINCT order_id) FROM lab_tests WHERE status = 'pending'",
                    None,
                )
                .await?,
            pending_verification: self
                .scalar_count("SELECT COUNT(*) FROM lab_tests WHERE status = 'results_ready'", None)
                .await?,
            completed_today: self
                .scalar_count(
                    "SELECT COUNT(*) FROM lab_tests WHERE status = 'verified' AND substr(verified_at, 1, 10) = ?",
                    today,
                )
                .await?,
        };

        let pharmacy = PharmacyQueueStats {
            pending_prescriptions: self
                .scalar_count("SELECT COUNT(*) FROM prescriptions WHERE status = 'pending'", None)
                .await?,
            dispensed_today: self
                .scalar_count(
                    "SELECT COUNT(*) FROM prescriptions WHERE status = 'dispensed' AND substr(dispensed_at, 1, 10) = ?",
                    today,
                )
                .await?,
        };

        let radiology = OrderQueueStats {
            pending_orders: self
                .scalar_count(
                    "SELECT COUNT(DISTINCT order_id) FROM radiology_studies WHERE status IN ('pending', 'scheduled')",
                    None,
                )
                .await?,
            pending_verification: self
                .scalar_count("SELECT COUNT(*) FROM radiology_studies WHERE status = 'reported'", None)
                .await?,
            completed_today: self
                .scalar_count(
                    "SELECT COUNT(*) FROM radiology_studies WHERE status = 'verified' AND substr(verified_at, 1, 10) = ?",
                    today,
                )
                .await?,
        };

        let consultation = ConsultationStats {
            active_sessions: self
                .scalar_count("SELECT COUNT(*) FROM consultation_sessions WHERE status = 'active'", None)
                .await?,
            completed_today: self
                .scalar_count(
                    "SELECT COUNT(*) FROM consultation_sessions WHERE status = 'completed' AND substr(ended_at, 1, 10) = ?",
                    today,
                )
                .await?,
        };

        let nursing = NursingStats {
            pending_orders: self
                .scalar_count("SELECT COUNT(*) FROM nursing_orders WHERE status = 'pending'", None)
                .await?,
            in_progress: self
                .scalar_count("SELECT COUNT(*) FROM nursing_orders WHERE status = 'in_progress'", None)
                .await?,
        };

        Ok(DashboardStats { patients, visits, laboratory, pharmacy, radiology, consultation, nursing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::laboratory::fixtures::cbc_order;
    use crate::ehr::patients::fixtures::employee;
    use crate::ehr::testing;
    use crate::ehr::visits::fixtures::new_visit;
    use crate::models::visit::VisitType;

    #[actix_web::test]
    async fn demographics_count_active_patients_only() {
        let store = testing::store().await;
        store.create_patient(employee("D1"), None).await.unwrap();
        let gone = store.create_patient(employee("D2"), None).await.unwrap();
        sqlx::query("UPDATE patients SET is_active = 0 WHERE id = ?")
            .bind(gone.id)
            .execute(store.pool())
            .await
            .unwrap();

        let report = store.patient_demographics(Utc::now().date_naive()).await.unwrap();
        assert_eq!(report.total_patients, 1);
        assert_eq!(report.by_category["employee"], 1);
        assert_eq!(report.by_category["retiree"], 0);
        assert_eq!(report.by_age_group.values().sum::<i64>(), 1);
        assert_eq!(report.by_blood_group.len(), BLOOD_GROUPS.len());
    }

    #[actix_web::test]
    async fn lab_statistics_split_pending_and_completed() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("D3"), None).await.unwrap();
        store.create_lab_order(cbc_order(patient.id), None).await.unwrap();

        let all = store.lab_statistics(&LabStatisticsQuery::default()).await.unwrap();
        assert_eq!(all.total_orders, 1);
        assert_eq!(all.by_priority["routine"], 1);
        assert_eq!(all.tests_completed, 0);
        assert_eq!(all.tests_pending, all.by_status["pending"]);
        assert!(all.tests_pending > 0);

        let tomorrow = Utc::now().date_naive().succ_opt().unwrap();
        let later = store
            .lab_statistics(&LabStatisticsQuery { start_date: Some(tomorrow), end_date: None })
            .await
            .unwrap();
        assert_eq!(later.total_orders, 0);
        assert_eq!(later.tests_pending, 0);
    }

    #[actix_web::test]
    async fn dashboard_counts_todays_activity() {
        let store = testing::store().await;
        let patient = store.create_patient(employee("D4"), None).await.unwrap();
        let mut visit = new_visit(patient.id, VisitType::Consultation);
        visit.date = Utc::now().date_naive();
        store.create_visit(visit, None).await.unwrap();

        let stats = store.dashboard_stats().await.unwrap();
        assert_eq!(stats.patients.total, 1);
        assert_eq!(stats.patients.new_today, 1);
        assert_eq!(stats.visits.total_today, 1);
        assert_eq!(stats.visits.scheduled, 1);
        assert_eq!(stats.nursing.pending_orders, 0);
    }
}
