use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    Workflow,
    LabResult,
    RadiologyResult,
    Prescription,
    Appointment,
    System,
    Alert,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
    Archived,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    pub action_url: String,
    pub object_type: String,
    pub object_id: String,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Message to deliver; recipients are chosen by the dispatch call.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub action_url: String,
    pub object_type: String,
    pub object_id: String,
    pub metadata: Value,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            priority: NotificationPriority::Normal,
            title: title.into(),
            message: message.into(),
            action_url: String::new(),
            object_type: String::new(),
            object_id: String::new(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn link(mut self, action_url: impl Into<String>) -> Self {
        self.action_url = action_url.into();
        self
    }

    pub fn object(mut self, object_type: &str, object_id: impl ToString) -> Self {
        self.object_type = object_type.to_string();
        self.object_id = object_id.to_string();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationFilter {
    #[serde(rename = "type")]
    pub kind: Option<NotificationKind>,
    pub priority: Option<NotificationPriority>,
    pub status: Option<NotificationStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationPreferences {
    pub id: i64,
    pub user_id: i64,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub lab_results_enabled: bool,
    pub radiology_results_enabled: bool,
    pub prescriptions_enabled: bool,
    pub appointments_enabled: bool,
    pub system_alerts_enabled: bool,
    pub low_priority_enabled: bool,
    pub normal_priority_enabled: bool,
    pub high_priority_enabled: bool,
    pub urgent_priority_enabled: bool,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// Whether a message of this kind and priority may be delivered at `now`.
    pub fn allows(&self, kind: NotificationKind, priority: NotificationPriority, now: NaiveTime) -> bool {
        if !self.in_app_enabled {
            return false;
        }

        let kind_enabled = match kind {
            NotificationKind::LabResult => self.lab_results_enabled,
            NotificationKind::RadiologyResult => self.radiology_results_enabled,
            NotificationKind::Prescription => self.prescriptions_enabled,
            NotificationKind::Appointment => self.appointments_enabled,
            NotificationKind::System => self.system_alerts_enabled,
            NotificationKind::Workflow | NotificationKind::Alert | NotificationKind::Reminder => true,
        };
        let priority_enabled = match priority {
            NotificationPriority::Low => self.low_priority_enabled,
            NotificationPriority::Normal => self.normal_priority_enabled,
            NotificationPriority::High => self.high_priority_enabled,
            NotificationPriority::Urgent => self.urgent_priority_enabled,
        };
        if !kind_enabled || !priority_enabled {
            return false;
        }

        match (self.quiet_hours_enabled, self.quiet_hours_start, self.quiet_hours_end) {
            (true, Some(start), Some(end)) => !in_quiet_hours(start, end, now),
            _ => true,
        }
    }
}

/// Inclusive window; `start > end` wraps past midnight.
pub fn in_quiet_hours(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesUpdate {
    pub in_app_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub lab_results_enabled: Option<bool>,
    pub radiology_results_enabled: Option<bool>,
    pub prescriptions_enabled: Option<bool>,
    pub appointments_enabled: Option<bool>,
    pub system_alerts_enabled: Option<bool>,
    pub low_priority_enabled: Option<bool>,
    pub normal_priority_enabled: Option<bool>,
    pub high_priority_enabled: Option<bool>,
    pub urgent_priority_enabled: Option<bool>,
    pub quiet_hours_enabled: Option<bool>,
    #[serde(default, with = "super::double_option")]
    pub quiet_hours_start: Option<Option<NaiveTime>>,
    #[serde(default, with = "super::double_option")]
    pub quiet_hours_end: Option<Option<NaiveTime>>,
}

impl PreferencesUpdate {
    pub fn apply(self, prefs: &mut NotificationPreferences) {
        let flags = [
            (self.in_app_enabled, &mut prefs.in_app_enabled),
            (self.email_enabled, &mut prefs.email_enabled),
            (self.sms_enabled, &mut prefs.sms_enabled),
            (self.lab_results_enabled, &mut prefs.lab_results_enabled),
            (self.radiology_results_enabled, &mut prefs.radiology_results_enabled),
            (self.prescriptions_enabled, &mut prefs.prescriptions_enabled),
            (self.appointments_enabled, &mut prefs.appointments_enabled),
            (self.system_alerts_enabled, &mut prefs.system_alerts_enabled),
            (self.low_priority_enabled, &mut prefs.low_priority_enabled),
            (self.normal_priority_enabled, &mut prefs.normal_priority_enabled),
            (self.high_priority_enabled, &mut prefs.high_priority_enabled),
            (self.urgent_priority_enabled, &mut prefs.urgent_priority_enabled),
            (self.quiet_hours_enabled, &mut prefs.quiet_hours_enabled),
        ];
        for (value, slot) in flags {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if let Some(start) = self.quiet_hours_start {
            prefs.quiet_hours_start = start;
        }
        if let Some(end) = self.quiet_hours_end {
            prefs.quiet_hours_end = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn prefs() -> NotificationPreferences {
        NotificationPreferences {
            id: 1,
            user_id: 1,
            in_app_enabled: true,
            email_enabled: false,
            sms_enabled: false,
            lab_results_enabled: true,
            radiology_results_enabled: true,
            prescriptions_enabled: true,
            appointments_enabled: true,
            system_alerts_enabled: true,
            low_priority_enabled: true,
            normal_priority_enabled: true,
            high_priority_enabled: true,
            urgent_priority_enabled: true,
            quiet_hours_enabled: false,
            quiet_hours_start: None,
            quiet_hours_end: None,
            updated_at: Utc::now(),
        }
    }

    #[test_case(t(22, 0), t(8, 0), t(23, 30), true ; "wraps before midnight")]
    #[test_case(t(22, 0), t(8, 0), t(7, 59), true ; "wraps after midnight")]
    #[test_case(t(22, 0), t(8, 0), t(12, 0), false ; "outside wrapped window")]
    #[test_case(t(12, 0), t(14, 0), t(13, 0), true ; "same day window")]
    #[test_case(t(12, 0), t(14, 0), t(14, 1), false ; "after same day window")]
    fn quiet_hours(start: NaiveTime, end: NaiveTime, now: NaiveTime, quiet: bool) {
        assert_eq!(in_quiet_hours(start, end, now), quiet);
    }

    #[test]
    fn module_flag_suppresses_only_its_kind() {
        let mut p = prefs();
        p.lab_results_enabled = false;
        assert!(!p.allows(NotificationKind::LabResult, NotificationPriority::Normal, t(10, 0)));
        assert!(p.allows(NotificationKind::Prescription, NotificationPriority::Normal, t(10, 0)));
    }

    #[test]
    fn in_app_off_suppresses_everything() {
        let mut p = prefs();
        p.in_app_enabled = false;
        assert!(!p.allows(NotificationKind::Workflow, NotificationPriority::Urgent, t(10, 0)));
    }

    #[test]
    fn quiet_hours_need_both_bounds() {
        let mut p = prefs();
        p.quiet_hours_enabled = true;
        p.quiet_hours_start = Some(t(0, 0));
        assert!(p.allows(NotificationKind::System, NotificationPriority::Low, t(3, 0)));
        p.quiet_hours_end = Some(t(6, 0));
        assert!(!p.allows(NotificationKind::System, NotificationPriority::Low, t(3, 0)));
    }

    #[test]
    fn explicit_null_clears_quiet_hours() {
        let mut p = prefs();
        p.quiet_hours_start = Some(t(22, 0));
        let update: PreferencesUpdate = serde_json::from_str(r#"{"quiet_hours_start": null, "low_priority_enabled": false}"#).unwrap();
        update.apply(&mut p);
        assert_eq!(p.quiet_hours_start, None);
        assert!(!p.low_priority_enabled);

        let untouched: PreferencesUpdate = serde_json::from_str("{}").unwrap();
        p.quiet_hours_end = Some(t(6, 0));
        untouched.apply(&mut p);
        assert_eq!(p.quiet_hours_end, Some(t(6, 0)));
    }
}
