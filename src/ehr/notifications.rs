use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{EhrDatabase, StoreResult};
use crate::db::listing::Ordering;
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::notification::{
    NewNotification, Notification, NotificationFilter, NotificationPreferences, NotificationStatus,
    PreferencesUpdate,
};

const NOTIFICATION_ORDERING: Ordering = Ordering {
    fields: &[("created_at", "created_at")],
    default: "-created_at",
    tiebreak: "id",
};

impl NotificationFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(kind) = self.kind {
            qb.push(" AND type = ").push_bind(kind);
        }
        if let Some(priority) = self.priority {
            qb.push(" AND priority = ").push_bind(priority);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
    }
}

impl EhrDatabase {
    // ===== Notifications =====

    #[instrument(skip(self, filter, params))]
    pub async fn list_notifications(
        &self,
        user_id: i64,
        filter: &NotificationFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Notification>> {
        self.fetch_page(
            "*",
            "FROM notifications WHERE 1 = 1",
            |qb| {
                qb.push(" AND user_id = ").push_bind(user_id);
                filter.push(qb);
            },
            &NOTIFICATION_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    /// Another user's notification is reported as missing.
    #[instrument(skip(self))]
    pub async fn get_notification(&self, user_id: i64, id: i64) -> StoreResult<Notification> {
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Notification"))
    }

    #[instrument(skip(self))]
    pub async fn mark_notification_read(&self, user_id: i64, id: i64) -> StoreResult<Notification> {
        self.get_notification(user_id, id).await?;
        sqlx::query("UPDATE notifications SET status = ?, read_at = ? WHERE id = ?")
            .bind(NotificationStatus::Read)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_notification(user_id, id).await
    }

    #[instrument(skip(self))]
    pub async fn mark_all_notifications_read(&self, user_id: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET status = ?, read_at = ? WHERE user_id = ? AND status = ?",
        )
        .bind(NotificationStatus::Read)
        .bind(Utc::now())
        .bind(user_id)
        .bind(NotificationStatus::Unread)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn archive_notification(&self, user_id: i64, id: i64) -> StoreResult<Notification> {
        self.get_notification(user_id, id).await?;
        sqlx::query("UPDATE notifications SET status = ? WHERE id = ?")
            .bind(NotificationStatus::Archived)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_notification(user_id, id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_notification(&self, user_id: i64, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Notification"));
        }
        Ok(())
    }

    pub async fn unread_notification_count(&self, user_id: i64) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND status = ?")
                .bind(user_id)
                .bind(NotificationStatus::Unread)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    // ===== Preferences =====

    #[instrument(skip(self))]
    pub async fn notification_preferences(&self, user_id: i64) -> StoreResult<NotificationPreferences> {
        sqlx::query(
            "INSERT INTO notification_preferences (user_id, updated_at) VALUES (?, ?)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(
            sqlx::query_as::<_, NotificationPreferences>(
                "SELECT * FROM notification_preferences WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?,
        )
    }

    #[instrument(skip(self, update))]
    pub async fn update_notification_preferences(
        &self,
        user_id: i64,
        update: PreferencesUpdate,
    ) -> StoreResult<NotificationPreferences> {
        let mut prefs = self.notification_preferences(user_id).await?;
        update.apply(&mut prefs);
        prefs.updated_at = Utc::now();

        sqlx::query(
            "UPDATE notification_preferences SET
                in_app_enabled = ?, email_enabled = ?, sms_enabled = ?,
                lab_results_enabled = ?, radiology_results_enabled = ?, prescriptions_enabled = ?,
                appointments_enabled = ?, system_alerts_enabled = ?,
                low_priority_enabled = ?, normal_priority_enabled = ?, high_priority_enabled = ?,
                urgent_priority_enabled = ?, quiet_hours_enabled = ?, quiet_hours_start = ?,
                quiet_hours_end = ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(prefs.in_app_enabled)
        .bind(prefs.email_enabled)
        .bind(prefs.sms_enabled)
        .bind(prefs.lab_results_enabled)
        .bind(prefs.radiology_results_enabled)
        .bind(prefs.prescriptions_enabled)
        .bind(prefs.appointments_enabled)
        .bind(prefs.system_alerts_enabled)
        .bind(prefs.low_priority_enabled)
        .bind(prefs.normal_priority_enabled)
        .bind(prefs.high_priority_enabled)
        .bind(prefs.urgent_priority_enabled)
        .bind(prefs.quiet_hours_enabled)
        .bind(prefs.quiet_hours_start)
        .bind(prefs.quiet_hours_end)
        .bind(prefs.updated_at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(prefs)
    }

    // ===== Dispatch =====

    /// Delivers to one user unless their preferences suppress it.
    #[instrument(skip(self, note), fields(kind = ?note.kind, title = %note.title))]
    pub async fn create_notification(
        &self,
        user_id: i64,
        note: &NewNotification,
    ) -> StoreResult<Option<Notification>> {
        let prefs = self.notification_preferences(user_id).await?;
        if !prefs.allows(note.kind, note.priority, Utc::now().time()) {
            info!(user_id, "Notification skipped due to preferences");
            return Ok(None);
        }

        let id = sqlx::query(
            "INSERT INTO notifications (
                user_id, type, priority, status, title, message, action_url,
                object_type, object_id, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(note.kind)
        .bind(note.priority)
        .bind(NotificationStatus::Unread)
        .bind(&note.title)
        .bind(&note.message)
        .bind(&note.action_url)
        .bind(&note.object_type)
        .bind(&note.object_id)
        .bind(Json(&note.metadata))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(user_id, notification_id = id, "Notification created");
        self.get_notification(user_id, id).await.map(Some)
    }

    pub async fn notify_users(&self, user_ids: &[i64], note: &NewNotification) -> StoreResult<Vec<Notification>> {
        let mut delivered = Vec::new();
        for &user_id in user_ids {
            if let Some(n) = self.create_notification(user_id, note).await? {
                delivered.push(n);
            }
        }
        Ok(delivered)
    }

    /// Delivers to every active user with the given system role.
    #[instrument(skip(self, note))]
    pub async fn notify_role(&self, system_role: &str, note: &NewNotification) -> StoreResult<Vec<Notification>> {
        let users = self.user_ids_with_role(system_role).await?;
        let delivered = self.notify_users(&users, note).await?;
        info!(count = delivered.len(), "Created notifications for role {}", system_role);
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::testing;
    use crate::models::notification::NotificationKind;

    #[actix_web::test]
    async fn role_dispatch_honours_preferences() {
        let store = testing::store().await;
        let p1 = store.create_user(new_user("pharm1", "Pharmacist")).await.unwrap();
        let p2 = store.create_user(new_user("pharm2", "Pharmacist")).await.unwrap();
        store.create_user(new_user("doc", "Medical Doctor")).await.unwrap();

        store
            .update_notification_preferences(
                p2.id,
                PreferencesUpdate {
                    prescriptions_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let note = NewNotification::new(NotificationKind::Prescription, "New Prescription", "RX waiting");
        let delivered = store.notify_role("Pharmacist", &note).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].user_id, p1.id);
    }

    #[actix_web::test]
    async fn read_state_is_per_user() {
        let store = testing::store().await;
        let a = store.create_user(new_user("a", "")).await.unwrap();
        let b = store.create_user(new_user("b", "")).await.unwrap();
        let note = NewNotification::new(NotificationKind::System, "Hello", "World");
        let n = store.create_notification(a.id, &note).await.unwrap().unwrap();
        store.create_notification(a.id, &note).await.unwrap();

        assert!(matches!(
            store.mark_notification_read(b.id, n.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.unread_notification_count(a.id).await.unwrap(), 2);

        let read = store.mark_notification_read(a.id, n.id).await.unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        assert!(read.read_at.is_some());
        assert_eq!(store.mark_all_notifications_read(a.id).await.unwrap(), 1);
        assert_eq!(store.unread_notification_count(a.id).await.unwrap(), 0);
    }
}
