use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{user_name_sql, EhrDatabase, StoreResult};
use crate::db::listing::{push_search, Ordering};
use crate::db::{ListParams, Page, PageRequest};
use crate::error::StoreError;
use crate::models::permissions::{
    EffectivePermissions, Role, RoleFilter, RoleInput, RoleUpdate, UserRole, UserRoleFilter, UserRoleInput,
};

const ROLE_ORDERING: Ordering = Ordering {
    fields: &[("name", "r.name"), ("created_at", "r.created_at")],
    default: "name",
    tiebreak: "r.id",
};

const USER_ROLE_ORDERING: Ordering = Ordering {
    fields: &[("assigned_at", "ur.assigned_at")],
    default: "-assigned_at",
    tiebreak: "ur.id",
};

const ROLE_COLUMNS: &str =
    "r.*, (SELECT COUNT(*) FROM user_roles x WHERE x.role_id = r.id) AS user_count";

fn user_role_columns() -> String {
    format!(
        "ur.*, {} AS user_name, r.name AS role_name, \
         CASE WHEN a.id IS NULL THEN NULL ELSE {} END AS assigned_by_name",
        user_name_sql("u"),
        user_name_sql("a")
    )
}

const USER_ROLE_FROM: &str = "FROM user_roles ur \
     JOIN users u ON u.id = ur.user_id \
     JOIN roles r ON r.id = ur.role_id \
     LEFT JOIN users a ON a.id = ur.assigned_by WHERE 1 = 1";

impl RoleFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
        if let Some(role_type) = self.role_type {
            qb.push(" AND r.type = ").push_bind(role_type);
        }
        if let Some(active) = self.is_active {
            qb.push(" AND r.is_active = ").push_bind(active);
        }
        push_search(qb, search, &["r.name", "r.description"]);
    }
}

impl UserRoleFilter {
    fn push(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(user) = self.user {
            qb.push(" AND ur.user_id = ").push_bind(user);
        }
        if let Some(role) = self.role {
            qb.push(" AND ur.role_id = ").push_bind(role);
        }
    }
}

impl EhrDatabase {
    // ===== Roles =====

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_role(&self, input: RoleInput) -> StoreResult<Role> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO roles (name, type, description, permissions, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&input.name)
        .bind(input.role_type)
        .bind(&input.description)
        .bind(Json(&input.permissions))
        .bind(input.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(role_id = id, "Role created: {}", input.name);
        self.get_role(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_role(&self, id: i64) -> StoreResult<Role> {
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Role"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_roles(
        &self,
        filter: &RoleFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<Role>> {
        let search = params.search_term().map(str::to_string);
        self.fetch_page(
            ROLE_COLUMNS,
            "FROM roles r WHERE 1 = 1",
            |qb| filter.push(qb, search.as_deref()),
            &ROLE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self, update))]
    pub async fn update_role(&self, id: i64, update: RoleUpdate) -> StoreResult<Role> {
        let mut role = self.get_role(id).await?;
        if let Some(v) = update.name {
            role.name = v;
        }
        if let Some(v) = update.role_type {
            role.role_type = v;
        }
        if let Some(v) = update.description {
            role.description = v;
        }
        if let Some(v) = update.permissions {
            role.permissions = Json(v);
        }
        if let Some(v) = update.is_active {
            role.is_active = v;
        }

        sqlx::query(
            "UPDATE roles SET name = ?, type = ?, description = ?, permissions = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&role.name)
        .bind(role.role_type)
        .bind(&role.description)
        .bind(&role.permissions)
        .bind(role.is_active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(role_id = id, "Role updated");
        self.get_role(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_role(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Role"));
        }
        Ok(())
    }

    /// Assignments of one role.
    #[instrument(skip(self))]
    pub async fn role_users(&self, role_id: i64) -> StoreResult<Vec<UserRole>> {
        self.get_role(role_id).await?;
        Ok(sqlx::query_as::<_, UserRole>(&format!(
            "SELECT {} {USER_ROLE_FROM} AND ur.role_id = ? ORDER BY ur.assigned_at DESC, ur.id DESC",
            user_role_columns()
        ))
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ===== Assignments =====

    #[instrument(skip(self))]
    pub async fn assign_role(&self, input: UserRoleInput, assigned_by: i64) -> StoreResult<UserRole> {
        self.get_user(input.user_id).await?;
        self.get_role(input.role_id).await?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = ? AND role_id = ?)",
        )
        .bind(input.user_id)
        .bind(input.role_id)
        .fetch_one(&self.pool)
        .await?;
        if taken {
            return Err(StoreError::field(
                "non_field_errors",
                "The fields user, role must make a unique set.",
            ));
        }

        let id = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id, assigned_at, assigned_by) VALUES (?, ?, ?, ?)",
        )
        .bind(input.user_id)
        .bind(input.role_id)
        .bind(Utc::now())
        .bind(assigned_by)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(user_id = input.user_id, role_id = input.role_id, "Role assigned");
        self.get_user_role(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_user_role(&self, id: i64) -> StoreResult<UserRole> {
        sqlx::query_as::<_, UserRole>(&format!(
            "SELECT {} {USER_ROLE_FROM} AND ur.id = ?",
            user_role_columns()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("User role"))
    }

    #[instrument(skip(self, filter, params))]
    pub async fn list_user_roles(
        &self,
        filter: &UserRoleFilter,
        params: &ListParams,
        request: PageRequest,
    ) -> StoreResult<Page<UserRole>> {
        self.fetch_page(
            &user_role_columns(),
            USER_ROLE_FROM,
            |qb| filter.push(qb),
            &USER_ROLE_ORDERING.clause(params.ordering.as_deref()),
            request,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn revoke_role(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User role"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn effective_permissions(&self, user_id: i64) -> StoreResult<EffectivePermissions> {
        let roles = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles r JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ? ORDER BY r.name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(EffectivePermissions::from_roles(&roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::accounts::fixtures::new_user;
    use crate::ehr::testing;
    use crate::models::permissions::{PermissionMap, RoleType};

    fn lab_role() -> RoleInput {
        RoleInput {
            name: "Lab Staff".into(),
            role_type: RoleType::LabTech,
            description: String::new(),
            permissions: PermissionMap::from([("laboratory".to_string(), vec!["*".to_string()])]),
            is_active: true,
        }
    }

    #[actix_web::test]
    async fn assignments_are_unique_and_counted() {
        let store = testing::store().await;
        let admin = store.create_user(new_user("admin", "")).await.unwrap();
        let tech = store.create_user(new_user("tech", "Laboratory Scientist")).await.unwrap();
        let role = store.create_role(lab_role()).await.unwrap();

        let assignment = store
            .assign_role(UserRoleInput { user_id: tech.id, role_id: role.id }, admin.id)
            .await
            .unwrap();
        assert_eq!(assignment.role_name, "Lab Staff");
        assert_eq!(assignment.assigned_by_name.as_deref(), Some("admin"));

        let again = store
            .assign_role(UserRoleInput { user_id: tech.id, role_id: role.id }, admin.id)
            .await;
        assert!(matches!(again, Err(StoreError::Validation(_))));

        assert_eq!(store.get_role(role.id).await.unwrap().user_count, 1);
        assert_eq!(store.role_users(role.id).await.unwrap().len(), 1);

        let effective = store.effective_permissions(tech.id).await.unwrap();
        assert!(effective.modules["laboratory"].contains("*"));
    }

    #[actix_web::test]
    async fn role_permissions_round_trip_through_json_column() {
        let store = testing::store().await;
        let role = store.create_role(lab_role()).await.unwrap();
        assert!(role.has_permission("laboratory", Some("results")));
        assert!(!role.has_permission("pharmacy", None));

        let updated = store
            .update_role(role.id, RoleUpdate { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(!updated.has_permission("laboratory", Some("results")));
    }
}
