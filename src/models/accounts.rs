use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

use super::invalid_choice;
use crate::security::Subject;

pub const SYSTEM_ROLES: [&str; 8] = [
    "System Administrator",
    "Medical Doctor",
    "Nursing Officer",
    "Laboratory Scientist",
    "Pharmacist",
    "Radiologist",
    "Medical Records Officer",
    "Admin Staff",
];

/// Role required of an appointment's doctor.
pub const MEDICAL_DOCTOR: &str = "Medical Doctor";

pub fn validate_system_role(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || SYSTEM_ROLES.contains(&value) {
        Ok(())
    } else {
        Err(invalid_choice("Not a valid system role."))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub employee_id: Option<String>,
    pub grade_level: String,
    pub system_role: String,
    pub directorate: String,
    pub division: String,
    pub department: String,
    pub phone: String,
    pub bio: String,
    pub is_management: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }

    pub fn subject(&self) -> Subject<'_> {
        Subject {
            id: self.id,
            username: &self.username,
            role: &self.system_role,
            is_staff: self.is_staff,
            is_superuser: self.is_superuser,
        }
    }
}

/// User as rendered by the API.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub full_name: String,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        let full_name = user.full_name();
        Self { user, full_name }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    pub fn identifier(&self) -> &str {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .map(str::trim)
            .unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: UserView,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePassword {
    pub old_password: String,
    #[validate(length(min = 8, message = "Ensure this field has at least 8 characters."))]
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirm: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email(message = "Enter a valid email address."))]
    #[serde(default)]
    pub email: Option<String>,
    #[validate(length(min = 8, message = "Ensure this field has at least 8 characters."))]
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub grade_level: String,
    #[validate(custom = "validate_system_role")]
    #[serde(default)]
    pub system_role: String,
    #[serde(default)]
    pub directorate: String,
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub is_management: bool,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub is_staff: bool,
}

fn yes() -> bool {
    true
}

/// Partial update; also used for `PATCH /auth/me/` with the staff-only
/// flags stripped.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub grade_level: Option<String>,
    #[validate(custom = "validate_system_role")]
    pub system_role: Option<String>,
    pub directorate: Option<String>,
    pub division: Option<String>,
    pub department: Option<String>,
    pub employee_id: Option<String>,
    pub is_management: Option<bool>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
}

impl UserUpdate {
    pub fn self_service(mut self) -> Self {
        self.employee_id = None;
        self.is_management = None;
        self.is_active = None;
        self.is_staff = None;
        self
    }

    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.email {
            user.email = v;
        }
        if let Some(v) = self.first_name {
            user.first_name = v;
        }
        if let Some(v) = self.last_name {
            user.last_name = v;
        }
        if let Some(v) = self.phone {
            user.phone = v;
        }
        if let Some(v) = self.bio {
            user.bio = v;
        }
        if let Some(v) = self.grade_level {
            user.grade_level = v;
        }
        if let Some(v) = self.system_role {
            user.system_role = v;
        }
        if let Some(v) = self.directorate {
            user.directorate = v;
        }
        if let Some(v) = self.division {
            user.division = v;
        }
        if let Some(v) = self.department {
            user.department = v;
        }
        if let Some(v) = self.employee_id {
            user.employee_id = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = self.is_management {
            user.is_management = v;
        }
        if let Some(v) = self.is_active {
            user.is_active = v;
        }
        if let Some(v) = self.is_staff {
            user.is_staff = v;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub system_role: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_management: Option<bool>,
}
