use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{user_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::models::audit::{ActivityFilter, ActivityLog, ActivityStats, NewActivity};

const ACTIVITY_ORDERING: Ordering = Ordering {
    fields: &[("created_at", "a.created_at")],
    default: "-created_at",
    tiebreak: "a.id",
};

const ACTIVITY_FROM: &str = "FROM activity_logs a LEFT JOIN users u ON u.id = a.user_id WHERE 1 = 1";

fn activity_columns() -> String {
    format!(
        "a.*, CASE WHEN u.id IS NULL THEN NULL ELSE {} END AS user_name, u.username AS user_username",
        user_name_sql("u")
    )
}

/// Row visibility: superusers see everything, everyone else their own rows.
#[derive(Debug, Clone, Copy)]
pub enum AuditScope {
    All,
    User(i64),
}

/// Upper bound on the stats window, about a century.
const MAX_STATS_DAYS: i64 = 36_500;

impl AuditScope {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let AuditScope::User(id) = self {
            qb.push(" AND a.user_id = ").push_bind(*id);
        }
    }
}

impl ActivityFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(user) = self.user {
            qb.push(" AND a.user_id = ").push_bind(user);
        }
        if let Some(action) = self.action {
            qb.push(" AND a.action = ").push_bind(action);
        }
        if let Some(object_type) = &self.object_type {
            qb.push(" AND a.object_type = ").push_bind(object_type.clone());
        }
        if let Some(module) = &self.module {
            qb.push(" AND a.module = ").push_bind(module.clone());
        }
        if let Some(severity) = self.severity {
            qb.push(" AND a.severity = ").push_bind(severity);
        }
        if let Some(result) = self.result {
            qb.push(" AND a.result = ").push_bind(result);
        }
        push_search(
            qb,
            search,
            &["a.description", "a.object_repr", "u.username", "u.email"],
        );
    }
}

impl EhrDatabase {
    // ===== Audit Trail =====

    #[instrument(skip(self, entry), fields(action = ?entry.action, module = %entry.module, object = %entry.object_type))]
    pub async fn log_activity(&self, entry: NewActivity) -> StoreResult<i64> {
        let id = sqlx::query(
            "INSERT INTO activity_logs (
                user_id, action, result, severity, object_type, object_id, object_repr,
                module, description, ip_address, user_agent, old_values, new_values,
                metadata, error_message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.result)
        .bind(entry.severity)
        .bind(&entry.object_type)
        .bind(&entry.object_id)
        .bind(&entry.object_repr)
        .bind(&entry.module)
        .bind(&entry.description)
        .bind(&entry.client.ip_address)
        .bind(&entry.client.user_agent)
        .bind(Json(&entry.old_values))
        .bind(Json(&entry.new_values))
        .bind(Json(&entry.metadata))
        .bind(&entry.error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(
            "Audit log created: {:?} {} by {:?} in {}",
            entry.action, entry.object_type, entry.user_id, entry.module
        );
        Ok(id)
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_activity(
        &self,
        scope: AuditScope,
        filter: &ActivityFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<ActivityLog>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            &activity_columns(),
            ACTIVITY_FROM,
            |qb| {
                scope.push(qb);
                filter.push(qb, search.as_deref());
            },
            &ACTIVITY_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn activity_stats(&self, scope: AuditScope, days: i64) -> StoreResult<ActivityStats> {
        let since = Utc::now() - Duration::days(days.clamp(0, MAX_STATS_DAYS));

        let by = |column: &'static str| {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT a.{column}, COUNT(*) {ACTIVITY_FROM} AND a.created_at >= "
            ));
            qb.push_bind(since);
            scope.push(&mut qb);
            qb.push(format!(" GROUP BY a.{column}"));
            qb
        };

        let mut by_action = by("action");
        let mut by_module = by("module");
        let mut by_severity = by("severity");
        let mut by_result = by("result");

        let by_action = counts(by_action.build_query_as().fetch_all(&self.pool).await?);
        let by_module = counts(by_module.build_query_as().fetch_all(&self.pool).await?);
        let by_severity = counts(by_severity.build_query_as().fetch_all(&self.pool).await?);
        let by_result = counts(by_result.build_query_as().fetch_all(&self.pool).await?);

        let mut recent = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} {ACTIVITY_FROM} AND a.created_at >= ",
            activity_columns()
        ));
        recent.push_bind(since);
        scope.push(&mut recent);
        recent.push(" ORDER BY a.created_at DESC, a.id DESC LIMIT 10");
        let recent_activity = recent
            .build_query_as::<ActivityLog>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ActivityStats {
            total_actions: by_action.values().sum(),
            by_action,
            by_module,
            by_severity,
            by_result,
            recent_activity,
        })
    }
}

fn counts(rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    rows.into_iter().filter(|(_, n)| *n > 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::testing;
    use crate::models::audit::{AuditAction, AuditResult, Severity};

    #[actix_web::test]
    async fn non_superusers_see_only_their_rows() {
        let store = testing::store().await;
        let alice = store.create_user(new_user("alice", "")).await.unwrap();
        let bob = store.create_user(new_user("bob", "")).await.unwrap();

        for user in [alice.id, alice.id, bob.id] {
            store
                .log_activity(NewActivity::new(AuditAction::Login, "authentication", "user", user).by(Some(user)))
                .await
                .unwrap();
        }

        let own = store
            .list_activity(AuditScope::User(bob.id), &ActivityFilter::default(), &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(own.count, 1);
        assert_eq!(own.results[0].user_username.as_deref(), Some("bob"));

        let all = store
            .list_activity(AuditScope::All, &ActivityFilter::default(), &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.count, 3);
    }

    #[actix_web::test]
    async fn stats_group_by_dimension() {
        let store = testing::store().await;
        store
            .log_activity(NewActivity::new(AuditAction::Login, "authentication", "user", ""))
            .await
            .unwrap();
        store
            .log_activity(
                NewActivity::new(AuditAction::Login, "authentication", "user", "")
                    .outcome(AuditResult::Failure, Severity::Warning),
            )
            .await
            .unwrap();
        store
            .log_activity(NewActivity::new(AuditAction::Create, "patients", "patient", 1))
            .await
            .unwrap();

        let stats = store.activity_stats(AuditScope::All, 30).await.unwrap();
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.by_action["login"], 2);
        assert_eq!(stats.by_module["patients"], 1);
        assert_eq!(stats.by_severity["warning"], 1);
        assert_eq!(stats.by_result["success"], 2);
        assert_eq!(stats.recent_activity.len(), 3);
    }

    #[actix_web::test]
    async fn stats_window_is_clamped() {
        let store = testing::store().await;
        store
            .log_activity(NewActivity::new(AuditAction::Create, "patients", "patient", 1))
            .await
            .unwrap();

        let widest = store.activity_stats(AuditScope::All, i64::MAX).await.unwrap();
        assert_eq!(widest.total_actions, 1);
        let negative = store.activity_stats(AuditScope::All, i64::MIN).await.unwrap();
        assert_eq!(negative.total_actions, 0);
    }
}
