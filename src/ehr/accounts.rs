use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::accounts::{NewUser, User, UserFilter, UserUpdate};
use crate::security;

const USER_ORDERING: Ordering = Ordering {
    fields: &[
        ("username", "username"),
        ("date_joined", "date_joined"),
        ("last_name", "last_name"),
    ],
    default: "username",
    tiebreak: "id",
};

impl UserFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(role) = &self.system_role {
            qb.push(" AND system_role = ").push_bind(role.clone());
        }
        if let Some(v) = self.is_active {
            qb.push(" AND is_active = ").push_bind(v);
        }
        if let Some(v) = self.is_staff {
            qb.push(" AND is_staff = ").push_bind(v);
        }
        if let Some(v) = self.is_management {
            qb.push(" AND is_management = ").push_bind(v);
        }
        push_search(
            qb,
            search,
            &["username", "email", "first_name", "last_name", "employee_id"],
        );
    }
}

impl EhrDatabase {
    // ===== Users =====

    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        if user.password != user.password_confirm {
            return Err(StoreError::field("password", "Password fields didn't match."));
        }
        let hash = security::hash_password(&user.password)
            .map_err(|e| StoreError::field("password", e.to_string()))?;
        self.insert_user(user, hash, false).await
    }

    /// Superuser bootstrap, not reachable over HTTP.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create_superuser(&self, user: NewUser) -> StoreResult<User> {
        let hash = security::hash_password(&user.password)
            .map_err(|e| StoreError::field("password", e.to_string()))?;
        self.insert_user(NewUser { is_staff: true, ..user }, hash, true).await
    }

    async fn insert_user(&self, user: NewUser, hash: String, superuser: bool) -> StoreResult<User> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
            .bind(&user.username)
            .fetch_one(&self.pool)
            .await?;
        if taken {
            return Err(StoreError::field("username", "A user with that username already exists."));
        }

        let id = sqlx::query(
            "INSERT INTO users (
                username, email, password_hash, first_name, last_name, employee_id,
                grade_level, system_role, directorate, division, department, phone, bio,
                is_management, is_staff, is_superuser, is_active, date_joined
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(user.email.clone().unwrap_or_default())
        .bind(&hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.employee_id.clone().filter(|s| !s.trim().is_empty()))
        .bind(&user.grade_level)
        .bind(&user.system_role)
        .bind(&user.directorate)
        .bind(&user.division)
        .bind(&user.department)
        .bind(&user.phone)
        .bind(&user.bio)
        .bind(user.is_management)
        .bind(user.is_staff)
        .bind(superuser)
        .bind(user.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(user_id = id, "User created: {}", user.username);
        self.get_user(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> StoreResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("User"))
    }

    /// Looks up by username first, then by email.
    #[instrument(skip(self))]
    pub async fn find_login_user(&self, identifier: &str) -> StoreResult<Option<User>> {
        if identifier.is_empty() {
            return Ok(None);
        }
        let by_username = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        if by_username.is_some() {
            return Ok(by_username);
        }
        let mut by_email = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email <> '' AND LOWER(email) = LOWER(?) LIMIT 2",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        // Ambiguous emails never authenticate.
        Ok(if by_email.len() == 1 { by_email.pop() } else { None })
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<User>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            "*",
            "FROM users WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &USER_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_user(&self, id: i64, update: UserUpdate) -> StoreResult<User> {
        let mut user = self.get_user(id).await?;
        update.apply(&mut user);

        sqlx::query(
            "UPDATE users SET email = ?, first_name = ?, last_name = ?, employee_id = ?,
                grade_level = ?, system_role = ?, directorate = ?, division = ?, department = ?,
                phone = ?, bio = ?, is_management = ?, is_staff = ?, is_active = ?
             WHERE id = ?",
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.employee_id)
        .bind(&user.grade_level)
        .bind(&user.system_role)
        .bind(&user.directorate)
        .bind(&user.division)
        .bind(&user.department)
        .bind(&user.phone)
        .bind(&user.bio)
        .bind(user.is_management)
        .bind(user.is_staff)
        .bind(user.is_active)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(user_id = id, "User updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        info!(user_id = id, "User deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn record_login(&self, id: i64) -> StoreResult<DateTime<Utc>> {
        let now = Utc::now();
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(now)
    }

    #[instrument(skip(self, password_hash))]
    pub async fn set_password(&self, id: i64, password_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!(user_id = id, "Password changed");
        Ok(())
    }

    /// Active users holding the given system role.
    #[instrument(skip(self))]
    pub async fn user_ids_with_role(&self, system_role: &str) -> StoreResult<Vec<i64>> {
        Ok(
            sqlx::query_scalar("SELECT id FROM users WHERE system_role = ? AND is_active = 1 ORDER BY id")
                .bind(system_role)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ===== Token blacklist =====

    /// Returns false when the jti was already blacklisted.
    #[instrument(skip(self))]
    pub async fn blacklist_token(
        &self,
        jti: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO token_blacklist (jti, user_id, expires_at, blacklisted_at)
             VALUES (?, ?, ?, ?) ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    pub async fn is_token_blacklisted(&self, jti: &str) -> StoreResult<bool> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM token_blacklist WHERE jti = ?)")
                .bind(jti)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn new_user(username: &str, role: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: Some(format!("{username}@clinic.test")),
            password: "password123".into(),
            password_confirm: "password123".into(),
            first_name: String::new(),
            last_name: String::new(),
            employee_id: None,
            grade_level: String::new(),
            system_role: role.into(),
            directorate: String::new(),
            division: String::new(),
            department: String::new(),
            phone: String::new(),
            bio: String::new(),
            is_management: false,
            is_active: true,
            is_staff: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::new_user;
    use super::*;
    use crate::ehr::testing;

    #[actix_web::test]
    async fn create_and_login_lookup() {
        let store = testing::store().await;
        let user = store.create_user(new_user("doc", "Medical Doctor")).await.unwrap();
        assert!(security::verify_password("password123", &user.password_hash));

        let found = store.find_login_user("doc@clinic.test").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_login_user("nobody").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn duplicate_username_is_field_error() {
        let store = testing::store().await;
        store.create_user(new_user("doc", "")).await.unwrap();
        let err = store.create_user(new_user("doc", "")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(ref f) if f.contains_key("username")));
    }

    #[actix_web::test]
    async fn mismatched_confirmation_rejected() {
        let store = testing::store().await;
        let mut user = new_user("doc", "");
        user.password_confirm = "different1".into();
        assert!(matches!(store.create_user(user).await, Err(StoreError::Validation(_))));
    }

    #[actix_web::test]
    async fn list_filters_by_role_and_orders_by_username() {
        let store = testing::store().await;
        store.create_user(new_user("zed", "Pharmacist")).await.unwrap();
        store.create_user(new_user("amy", "Pharmacist")).await.unwrap();
        store.create_user(new_user("bob", "Radiologist")).await.unwrap();

        let filter = UserFilter {
            system_role: Some("Pharmacist".into()),
            ..Default::default()
        };
        let page = store
            .list_users(&filter, &ListParams::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        let names: Vec<_> = page.results.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["amy", "zed"]);
    }

    #[actix_web::test]
    async fn blacklist_is_idempotent() {
        let store = testing::store().await;
        let user = store.create_user(new_user("doc", "")).await.unwrap();
        assert!(store.blacklist_token("jti-1", user.id, Utc::now()).await.unwrap());
        assert!(!store.blacklist_token("jti-1", user.id, Utc::now()).await.unwrap());
        assert!(store.is_token_blacklisted("jti-1").await.unwrap());
        assert!(!store.is_token_blacklisted("jti-2").await.unwrap());
    }
}
