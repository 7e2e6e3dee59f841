use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

/// Module name to the pages it grants; `*` grants every page.
pub type PermissionMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RoleType {
    Admin,
    Doctor,
    Nurse,
    LabTech,
    Pharmacist,
    Radiologist,
    Records,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub role_type: RoleType,
    pub description: String,
    pub permissions: Json<PermissionMap>,
    pub is_active: bool,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn has_permission(&self, module: &str, page: Option<&str>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.role_type == RoleType::Admin {
            return true;
        }
        match self.permissions.get(module) {
            Some(pages) => match page {
                Some(page) => pages.iter().any(|p| p == "*" || p == page),
                None => !pages.is_empty(),
            },
            None => false,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RoleInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(rename = "type", default)]
    pub role_type: RoleType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: PermissionMap,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RoleUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub role_type: Option<RoleType>,
    pub description: Option<String>,
    pub permissions: Option<PermissionMap>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleFilter {
    #[serde(rename = "type")]
    pub role_type: Option<RoleType>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRole {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<i64>,
    pub user_name: String,
    pub role_name: String,
    pub assigned_by_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserRoleInput {
    #[serde(alias = "user")]
    pub user_id: i64,
    #[serde(alias = "role")]
    pub role_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserRoleFilter {
    pub user: Option<i64>,
    pub role: Option<i64>,
}

/// Union of a user's active roles.
#[derive(Debug, Default, Serialize)]
pub struct EffectivePermissions {
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub modules: BTreeMap<String, BTreeSet<String>>,
}

impl EffectivePermissions {
    pub fn from_roles<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Self {
        let mut effective = EffectivePermissions::default();
        for role in roles.into_iter().filter(|r| r.is_active) {
            effective.roles.push(role.name.clone());
            if role.role_type == RoleType::Admin {
                effective.is_admin = true;
            }
            for (module, pages) in role.permissions.iter() {
                effective
                    .modules
                    .entry(module.clone())
                    .or_default()
                    .extend(pages.iter().cloned());
            }
        }
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn role(role_type: RoleType, active: bool) -> Role {
        let mut permissions = PermissionMap::new();
        permissions.insert("laboratory".into(), vec!["orders".into(), "results".into()]);
        permissions.insert("pharmacy".into(), vec!["*".into()]);
        permissions.insert("reports".into(), vec![]);
        Role {
            id: 1,
            name: "Lab".into(),
            role_type,
            description: String::new(),
            permissions: Json(permissions),
            is_active: active,
            user_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test_case("laboratory", Some("orders"), true ; "listed page")]
    #[test_case("laboratory", Some("templates"), false ; "unlisted page")]
    #[test_case("pharmacy", Some("inventory"), true ; "wildcard")]
    #[test_case("laboratory", None, true ; "module without page")]
    #[test_case("reports", None, false ; "empty module")]
    #[test_case("radiology", None, false ; "missing module")]
    fn custom_role_permissions(module: &str, page: Option<&str>, expected: bool) {
        assert_eq!(role(RoleType::Custom, true).has_permission(module, page), expected);
    }

    #[test]
    fn inactive_role_grants_nothing() {
        assert!(!role(RoleType::Admin, false).has_permission("pharmacy", None));
    }

    #[test]
    fn admin_grants_everything() {
        assert!(role(RoleType::Admin, true).has_permission("radiology", Some("anything")));
    }

    #[test]
    fn effective_permissions_union_active_roles() {
        let mut other = role(RoleType::Custom, true);
        other.name = "Nursing".into();
        other.permissions = Json(PermissionMap::from([("nursing".to_string(), vec!["orders".to_string()])]));
        let inactive = role(RoleType::Admin, false);

        let effective = EffectivePermissions::from_roles([&role(RoleType::Custom, true), &other, &inactive]);
        assert!(!effective.is_admin);
        assert_eq!(effective.roles, ["Lab", "Nursing"]);
        assert!(effective.modules["nursing"].contains("orders"));
        assert!(effective.modules["laboratory"].contains("results"));
    }
}
