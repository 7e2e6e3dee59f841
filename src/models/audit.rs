use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

use crate::api::middleware::ClientInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Export,
    Import,
    Verify,
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_username: Option<String>,
    pub action: AuditAction,
    pub result: AuditResult,
    pub severity: Severity,
    pub object_type: String,
    pub object_id: String,
    pub object_repr: String,
    pub module: String,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub old_values: Json<Value>,
    pub new_values: Json<Value>,
    pub metadata: Json<Value>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// Audit row to append.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub result: AuditResult,
    pub severity: Severity,
    pub object_type: String,
    pub object_id: String,
    pub object_repr: String,
    pub module: String,
    pub description: String,
    pub client: ClientInfo,
    pub old_values: Value,
    pub new_values: Value,
    pub metadata: Value,
    pub error_message: String,
}

impl NewActivity {
    pub fn new(action: AuditAction, module: &str, object_type: &str, object_id: impl ToString) -> Self {
        Self {
            user_id: None,
            action,
            result: AuditResult::Success,
            severity: Severity::Info,
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            object_repr: String::new(),
            module: module.to_string(),
            description: String::new(),
            client: ClientInfo::default(),
            old_values: Value::Object(Default::default()),
            new_values: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
            error_message: String::new(),
        }
    }

    pub fn by(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn repr(mut self, repr: impl Into<String>) -> Self {
        self.object_repr = repr.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn outcome(mut self, result: AuditResult, severity: Severity) -> Self {
        self.result = result;
        self.severity = severity;
        self
    }

    pub fn client(mut self, client: &ClientInfo) -> Self {
        self.client = client.clone();
        self
    }

    pub fn values(mut self, old: Value, new: Value) -> Self {
        self.old_values = old;
        self.new_values = new;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityFilter {
    pub user: Option<i64>,
    pub action: Option<AuditAction>,
    pub object_type: Option<String>,
    pub module: Option<String>,
    pub severity: Option<Severity>,
    pub result: Option<AuditResult>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

#[derive(Debug, Serialize)]
pub struct ActivityStats {
    pub total_actions: i64,
    pub by_action: BTreeMap<String, i64>,
    pub by_module: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
    pub by_result: BTreeMap<String, i64>,
    pub recent_activity: Vec<ActivityLog>,
}
