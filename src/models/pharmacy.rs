use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Days ahead of today that count as "expiring".
pub const EXPIRY_WARNING_DAYS: u64 = 30;

pub const MEDICATION_CATEGORIES: &[&str] = &[
    "Antibiotics",
    "Analgesics",
    "Antimalarials",
    "Antifungals",
    "Antivirals",
    "Anticonvulsants",
    "Antipsychotics",
    "Antidepressants",
    "Antihistamines",
    "Cardiovascular",
    "Corticosteroids",
    "Dermatology",
    "Diabetes",
    "Diuretics",
    "Emergency/Critical Care",
    "Gastrointestinal",
    "Hormones",
    "Ophthalmology",
    "Oncology",
    "Pediatrics",
    "Respiratory",
    "Vitamins & Supplements",
    "Other",
];

fn validate_category(value: &str) -> Result<(), validator::ValidationError> {
    if value.is_empty() || MEDICATION_CATEGORIES.contains(&value) {
        Ok(())
    } else {
        Err(super::invalid_choice("Select a valid medication category."))
    }
}

// ===== Medications =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Medication {
    pub id: i64,
    pub name: String,
    pub generic_name: String,
    pub code: String,
    pub unit: String,
    pub strength: String,
    pub form: String,
    pub category: String,
    pub manufacturer: String,
    pub pack_size: Option<i64>,
    pub prescription_required: bool,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct MedicationInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub generic_name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub unit: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    #[validate(custom = "validate_category")]
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    #[validate(range(min = 1))]
    pub pack_size: Option<i64>,
    pub prescription_required: Option<bool>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MedicationFilter {
    pub form: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

// ===== Inventory =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InventoryItem {
    pub id: i64,
    #[serde(rename = "medication")]
    pub medication_id: i64,
    pub medication_name: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: f64,
    pub unit: String,
    pub min_stock_level: f64,
    pub max_stock_level: Option<f64>,
    pub location: String,
    pub supplier: String,
    pub purchase_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub is_low_stock: bool,
    #[sqlx(skip)]
    pub is_expired: bool,
}

impl InventoryItem {
    /// Fills the derived stock flags as of `today`.
    pub fn flagged(mut self, today: NaiveDate) -> Self {
        self.is_low_stock = self.quantity <= self.min_stock_level;
        self.is_expired = self.expiry_date < today;
        self
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct InventoryInput {
    #[serde(alias = "medication")]
    pub medication_id: Option<i64>,
    #[validate(length(min = 1, max = 100))]
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(range(min = 0.0, message = "Ensure this value is greater than or equal to 0."))]
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    #[validate(range(min = 0.0))]
    pub min_stock_level: Option<f64>,
    #[serde(default, with = "super::double_option")]
    pub max_stock_level: Option<Option<f64>>,
    pub location: Option<String>,
    pub supplier: Option<String>,
    #[serde(default, with = "super::double_option")]
    pub purchase_price: Option<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryFilter {
    pub medication: Option<i64>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowStock,
    Expiring,
    Expired,
    #[default]
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    #[serde(default, rename = "type")]
    pub kind: AlertKind,
}

/// Expiry window for alerts starting at `today`.
pub fn expiry_threshold(today: NaiveDate) -> NaiveDate {
    today.checked_add_days(Days::new(EXPIRY_WARNING_DAYS)).unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub low_stock_count: i64,
    pub expiring_count: i64,
    pub expired_count: i64,
    pub total_alerts: i64,
}

// ===== Prescriptions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    #[default]
    Pending,
    Dispensing,
    PartiallyDispensed,
    Dispensed,
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrescriptionStatus::Pending => "pending",
            PrescriptionStatus::Dispensing => "dispensing",
            PrescriptionStatus::PartiallyDispensed => "partially_dispensed",
            PrescriptionStatus::Dispensed => "dispensed",
            PrescriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_dispense(self) -> bool {
        !matches!(self, PrescriptionStatus::Dispensed | PrescriptionStatus::Cancelled)
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, PrescriptionStatus::Pending | PrescriptionStatus::Dispensing)
    }

    /// Status implied by the items' dispensed quantities.
    pub fn recalculated(self, items: &[(f64, f64)]) -> PrescriptionStatus {
        if self == PrescriptionStatus::Cancelled {
            return self;
        }
        if items.is_empty() {
            return PrescriptionStatus::Pending;
        }
        let all_done = items.iter().all(|(ordered, dispensed)| dispensed >= ordered);
        let any_started = items.iter().any(|(_, dispensed)| *dispensed > 0.0);
        if all_done {
            PrescriptionStatus::Dispensed
        } else if any_started || self == PrescriptionStatus::Dispensed {
            PrescriptionStatus::PartiallyDispensed
        } else {
            PrescriptionStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PrescriptionItem {
    pub id: i64,
    #[serde(rename = "prescription")]
    pub prescription_id: i64,
    #[serde(rename = "medication")]
    pub medication_id: i64,
    pub medication_name: String,
    pub medication_code: String,
    pub quantity: f64,
    pub unit: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub dispensed_quantity: f64,
    pub is_dispensed: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Prescription {
    pub id: i64,
    pub prescription_id: String,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    #[serde(rename = "doctor")]
    pub doctor_id: Option<i64>,
    pub doctor_name: Option<String>,
    #[serde(rename = "visit")]
    pub visit_id: Option<i64>,
    pub status: PrescriptionStatus,
    pub diagnosis: String,
    pub notes: String,
    pub prescribed_at: DateTime<Utc>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
    #[sqlx(skip)]
    #[serde(rename = "medications")]
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPrescriptionItem {
    #[serde(alias = "medication")]
    pub medication_id: i64,
    #[validate(range(min = 0.0, message = "Ensure this value is greater than or equal to 0."))]
    pub quantity: f64,
    /// Defaults to the medication's unit.
    pub unit: Option<String>,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPrescription {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    #[serde(alias = "doctor")]
    pub doctor_id: Option<i64>,
    #[serde(alias = "visit")]
    pub visit_id: Option<i64>,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, alias = "medications")]
    #[validate]
    pub items: Vec<NewPrescriptionItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionUpdate {
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    #[serde(default, alias = "doctor", with = "super::double_option")]
    pub doctor_id: Option<Option<i64>>,
    #[serde(default, alias = "visit", with = "super::double_option")]
    pub visit_id: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrescriptionFilter {
    pub patient: Option<i64>,
    pub doctor: Option<i64>,
    pub status: Option<PrescriptionStatus>,
}

// ===== Dispensing =====

#[derive(Debug, Clone, Deserialize)]
pub struct DispenseRequest {
    pub item_id: i64,
    pub quantity: f64,
    pub inventory_id: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Dispense {
    pub id: i64,
    pub dispense_id: String,
    #[serde(rename = "prescription")]
    pub prescription_id: i64,
    #[serde(rename = "prescription_item")]
    pub prescription_item_id: i64,
    #[serde(rename = "medication")]
    pub medication_id: i64,
    pub medication_name: String,
    pub patient_name: String,
    #[serde(rename = "inventory_item")]
    pub inventory_item_id: Option<i64>,
    pub quantity: f64,
    pub unit: String,
    pub batch_number: String,
    pub dispensed_by: Option<i64>,
    pub dispensed_by_name: Option<String>,
    pub dispensed_at: DateTime<Utc>,
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispenseFilter {
    pub prescription: Option<i64>,
    pub medication: Option<i64>,
    pub dispensed_by: Option<i64>,
}
