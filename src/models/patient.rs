use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use validator::{Validate, ValidationError};

use super::{invalid_choice, validate_phone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PatientCategory {
    Employee,
    Retiree,
    Nonnpa,
    Dependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

const TITLES: [(&str, &str); 9] = [
    ("mr", "Mr"),
    ("mrs", "Mrs"),
    ("ms", "Ms"),
    ("dr", "Dr"),
    ("chief", "Chief"),
    ("engr", "Engr"),
    ("prof", "Prof"),
    ("alhaji", "Alhaji"),
    ("hajia", "Hajia"),
];

const MARITAL_STATUSES: [&str; 4] = ["single", "married", "divorced", "widowed"];
pub const BLOOD_GROUPS: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];
const GENOTYPES: [&str; 5] = ["AA", "AS", "SS", "AC", "SC"];

fn one_of(value: &str, choices: &[&str]) -> Result<(), ValidationError> {
    if value.is_empty() || choices.contains(&value) {
        Ok(())
    } else {
        Err(invalid_choice("Not a valid choice."))
    }
}

fn validate_title(value: &str) -> Result<(), ValidationError> {
    let titles: Vec<&str> = TITLES.iter().map(|(key, _)| *key).collect();
    one_of(value, &titles)
}

fn validate_marital_status(value: &str) -> Result<(), ValidationError> {
    one_of(value, &MARITAL_STATUSES)
}

fn validate_blood_group(value: &str) -> Result<(), ValidationError> {
    one_of(value, &BLOOD_GROUPS)
}

fn validate_genotype(value: &str) -> Result<(), ValidationError> {
    one_of(value, &GENOTYPES)
}

fn phone_or_blank(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Ok(())
    } else {
        validate_phone(value)
    }
}

fn email_or_blank(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || validator::validate_email(value) {
        Ok(())
    } else {
        let mut error = ValidationError::new("email");
        error.message = Some("Enter a valid email address.".into());
        Err(error)
    }
}

/// Known abbreviations map to their display form; anything else is title cased.
pub fn display_title(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    if let Some((_, display)) = TITLES.iter().find(|(key, _)| *key == lower) {
        return display.to_string();
    }
    title
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Whole years between `date_of_birth` and `today`.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let had_birthday = (today.month(), today.day()) >= (date_of_birth.month(), date_of_birth.day());
    today.year() - date_of_birth.year() - if had_birthday { 0 } else { 1 }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: i64,
    pub patient_id: String,
    pub category: PatientCategory,
    pub title: String,
    pub surname: String,
    pub first_name: String,
    pub middle_name: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub marital_status: String,
    pub religion: String,
    pub tribe: String,
    pub occupation: Option<String>,
    pub personal_number: Option<String>,
    pub employee_type: Option<String>,
    pub division: Option<String>,
    pub location: Option<String>,
    pub nonnpa_type: Option<String>,
    pub dependent_type: Option<String>,
    #[serde(rename = "principal_staff")]
    pub principal_staff_id: Option<i64>,
    pub email: String,
    pub phone: String,
    pub state_of_residence: String,
    pub residential_address: String,
    pub state_of_origin: String,
    pub lga: String,
    pub permanent_address: String,
    pub blood_group: String,
    pub genotype: String,
    pub allergies: String,
    pub nok_surname: String,
    pub nok_first_name: String,
    pub nok_middle_name: String,
    pub nok_relationship: String,
    pub nok_address: String,
    pub nok_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub is_active: bool,
}

impl Patient {
    pub fn full_name(&self) -> String {
        let title = if self.title.is_empty() {
            String::new()
        } else {
            display_title(&self.title)
        };
        [title.as_str(), self.first_name.as_str(), self.middle_name.as_str(), self.surname.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn age(&self) -> i32 {
        age_on(self.date_of_birth, Utc::now().date_naive())
    }
}

/// Patient detail as rendered by the API.
#[derive(Debug, Clone, Serialize)]
pub struct PatientView {
    #[serde(flatten)]
    pub patient: Patient,
    pub full_name: String,
    pub age: i32,
}

impl From<Patient> for PatientView {
    fn from(patient: Patient) -> Self {
        Self {
            full_name: patient.full_name(),
            age: patient.age(),
            patient,
        }
    }
}

/// Lightweight list shape.
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub id: i64,
    pub patient_id: String,
    pub category: PatientCategory,
    pub full_name: String,
    pub gender: Gender,
    pub age: i32,
    pub phone: String,
    pub email: String,
    pub blood_group: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Patient> for PatientSummary {
    fn from(p: Patient) -> Self {
        Self {
            full_name: p.full_name(),
            age: p.age(),
            id: p.id,
            patient_id: p.patient_id,
            category: p.category,
            gender: p.gender,
            phone: p.phone,
            email: p.email,
            blood_group: p.blood_group,
            is_active: p.is_active,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPatient {
    pub category: PatientCategory,
    #[serde(default)]
    #[validate(custom = "validate_title")]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub surname: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub middle_name: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    #[validate(custom = "validate_marital_status")]
    pub marital_status: String,
    #[serde(default)]
    pub religion: String,
    #[serde(default)]
    pub tribe: String,
    pub occupation: Option<String>,
    pub personal_number: Option<String>,
    pub employee_type: Option<String>,
    pub division: Option<String>,
    pub location: Option<String>,
    pub nonnpa_type: Option<String>,
    pub dependent_type: Option<String>,
    #[serde(alias = "principal_staff")]
    pub principal_staff_id: Option<i64>,
    #[serde(default)]
    #[validate(custom = "email_or_blank")]
    pub email: String,
    #[serde(default)]
    #[validate(custom = "phone_or_blank")]
    pub phone: String,
    #[serde(default)]
    pub state_of_residence: String,
    #[serde(default)]
    pub residential_address: String,
    #[serde(default)]
    pub state_of_origin: String,
    #[serde(default)]
    pub lga: String,
    #[serde(default)]
    pub permanent_address: String,
    #[serde(default)]
    #[validate(custom = "validate_blood_group")]
    pub blood_group: String,
    #[serde(default)]
    #[validate(custom = "validate_genotype")]
    pub genotype: String,
    #[serde(default)]
    pub allergies: String,
    #[serde(default)]
    pub nok_surname: String,
    #[serde(default)]
    pub nok_first_name: String,
    #[serde(default)]
    pub nok_middle_name: String,
    #[serde(default)]
    pub nok_relationship: String,
    #[serde(default)]
    pub nok_address: String,
    #[serde(default)]
    #[validate(custom = "phone_or_blank")]
    pub nok_phone: String,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

/// Partial update; the patient identifier itself is never rewritten.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct PatientUpdate {
    pub category: Option<PatientCategory>,
    #[validate(custom = "validate_title")]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub surname: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(custom = "validate_marital_status")]
    pub marital_status: Option<String>,
    pub religion: Option<String>,
    pub tribe: Option<String>,
    pub occupation: Option<String>,
    pub personal_number: Option<String>,
    pub employee_type: Option<String>,
    pub division: Option<String>,
    pub location: Option<String>,
    pub nonnpa_type: Option<String>,
    pub dependent_type: Option<String>,
    #[serde(default, alias = "principal_staff", with = "super::double_option")]
    pub principal_staff_id: Option<Option<i64>>,
    #[validate(custom = "email_or_blank")]
    pub email: Option<String>,
    #[validate(custom = "phone_or_blank")]
    pub phone: Option<String>,
    pub state_of_residence: Option<String>,
    pub residential_address: Option<String>,
    pub state_of_origin: Option<String>,
    pub lga: Option<String>,
    pub permanent_address: Option<String>,
    #[validate(custom = "validate_blood_group")]
    pub blood_group: Option<String>,
    #[validate(custom = "validate_genotype")]
    pub genotype: Option<String>,
    pub allergies: Option<String>,
    pub nok_surname: Option<String>,
    pub nok_first_name: Option<String>,
    pub nok_middle_name: Option<String>,
    pub nok_relationship: Option<String>,
    pub nok_address: Option<String>,
    #[validate(custom = "phone_or_blank")]
    pub nok_phone: Option<String>,
    pub is_active: Option<bool>,
}

impl PatientUpdate {
    pub fn apply(self, p: &mut Patient) {
        if let Some(v) = self.category {
            p.category = v;
        }
        if let Some(v) = self.gender {
            p.gender = v;
        }
        if let Some(v) = self.date_of_birth {
            p.date_of_birth = v;
        }
        if let Some(v) = self.principal_staff_id {
            p.principal_staff_id = v;
        }
        if let Some(v) = self.is_active {
            p.is_active = v;
        }

        let text = [
            (self.title, &mut p.title),
            (self.surname, &mut p.surname),
            (self.first_name, &mut p.first_name),
            (self.middle_name, &mut p.middle_name),
            (self.marital_status, &mut p.marital_status),
            (self.religion, &mut p.religion),
            (self.tribe, &mut p.tribe),
            (self.email, &mut p.email),
            (self.phone, &mut p.phone),
            (self.state_of_residence, &mut p.state_of_residence),
            (self.residential_address, &mut p.residential_address),
            (self.state_of_origin, &mut p.state_of_origin),
            (self.lga, &mut p.lga),
            (self.permanent_address, &mut p.permanent_address),
            (self.blood_group, &mut p.blood_group),
            (self.genotype, &mut p.genotype),
            (self.allergies, &mut p.allergies),
            (self.nok_surname, &mut p.nok_surname),
            (self.nok_first_name, &mut p.nok_first_name),
            (self.nok_middle_name, &mut p.nok_middle_name),
            (self.nok_relationship, &mut p.nok_relationship),
            (self.nok_address, &mut p.nok_address),
            (self.nok_phone, &mut p.nok_phone),
        ];
        for (value, slot) in text {
            if let Some(value) = value {
                *slot = value;
            }
        }

        let nullable = [
            (self.occupation, &mut p.occupation),
            (self.personal_number, &mut p.personal_number),
            (self.employee_type, &mut p.employee_type),
            (self.division, &mut p.division),
            (self.location, &mut p.location),
            (self.nonnpa_type, &mut p.nonnpa_type),
            (self.dependent_type, &mut p.dependent_type),
        ];
        for (value, slot) in nullable {
            if value.is_some() {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientFilter {
    pub category: Option<PatientCategory>,
    pub gender: Option<Gender>,
    pub blood_group: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub include_inactive: bool,
}

// ===== Medical history =====

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MedicalHistory {
    pub id: i64,
    #[serde(rename = "patient")]
    pub patient_id: i64,
    pub patient_name: String,
    pub allergies: Json<Vec<Value>>,
    pub diagnoses: Json<Vec<Value>>,
    pub current_medications: Json<Vec<Value>>,
    pub surgical_history: Json<Vec<Value>>,
    pub family_history: Json<Vec<Value>>,
    pub social_history: Json<serde_json::Map<String, Value>>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MedicalHistoryUpdate {
    pub allergies: Option<Vec<Value>>,
    pub diagnoses: Option<Vec<Value>>,
    pub current_medications: Option<Vec<Value>>,
    pub surgical_history: Option<Vec<Value>>,
    pub family_history: Option<Vec<Value>>,
    pub social_history: Option<serde_json::Map<String, Value>>,
}

impl MedicalHistoryUpdate {
    pub fn apply(self, history: &mut MedicalHistory) {
        let lists = [
            (self.allergies, &mut history.allergies),
            (self.diagnoses, &mut history.diagnoses),
            (self.current_medications, &mut history.current_medications),
            (self.surgical_history, &mut history.surgical_history),
            (self.family_history, &mut history.family_history),
        ];
        for (value, slot) in lists {
            if let Some(value) = value {
                *slot = Json(value);
            }
        }
        if let Some(social) = self.social_history {
            history.social_history = Json(social);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test_case("mr", "Mr" ; "known lowercase")]
    #[test_case(" DR ", "Dr" ; "known padded")]
    #[test_case("HIS excellency", "His Excellency" ; "unknown title cased")]
    fn titles(input: &str, expected: &str) {
        assert_eq!(display_title(input), expected);
    }

    #[test_case(date(2000, 6, 15), date(2025, 6, 14), 24 ; "day before birthday")]
    #[test_case(date(2000, 6, 15), date(2025, 6, 15), 25 ; "on birthday")]
    #[test_case(date(2000, 12, 31), date(2025, 1, 1), 24 ; "new year")]
    fn ages(dob: NaiveDate, today: NaiveDate, expected: i32) {
        assert_eq!(age_on(dob, today), expected);
    }

    fn payload() -> serde_json::Value {
        serde_json::json!({
            "category": "employee",
            "surname": "Okafor",
            "first_name": "Ada",
            "gender": "female",
            "date_of_birth": "1990-01-01",
            "personal_number": "a123",
        })
    }

    #[test]
    fn blank_optional_choices_are_accepted() {
        let input: NewPatient = serde_json::from_value(payload()).unwrap();
        assert!(input.validate().is_ok());
        assert!(input.is_active);
    }

    #[test_case("blood_group", "C+")]
    #[test_case("genotype", "XX")]
    #[test_case("phone", "12-34")]
    #[test_case("email", "not-an-email")]
    #[test_case("title", "sir")]
    fn invalid_choices_are_keyed_by_field(field: &str, value: &str) {
        let mut body = payload();
        body[field] = value.into();
        let input: NewPatient = serde_json::from_value(body).unwrap();
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key(field));
    }

    #[test]
    fn update_leaves_absent_fields_alone() {
        let input: NewPatient = serde_json::from_value(payload()).unwrap();
        let mut patient = Patient {
            id: 1,
            patient_id: "E-A123".into(),
            category: input.category,
            title: "mrs".into(),
            surname: input.surname,
            first_name: input.first_name,
            middle_name: String::new(),
            gender: input.gender,
            date_of_birth: input.date_of_birth,
            marital_status: String::new(),
            religion: String::new(),
            tribe: String::new(),
            occupation: None,
            personal_number: Some("A123".into()),
            employee_type: None,
            division: Some("Ports".into()),
            location: None,
            nonnpa_type: None,
            dependent_type: None,
            principal_staff_id: None,
            email: String::new(),
            phone: String::new(),
            state_of_residence: String::new(),
            residential_address: String::new(),
            state_of_origin: String::new(),
            lga: String::new(),
            permanent_address: String::new(),
            blood_group: String::new(),
            genotype: String::new(),
            allergies: String::new(),
            nok_surname: String::new(),
            nok_first_name: String::new(),
            nok_middle_name: String::new(),
            nok_relationship: String::new(),
            nok_address: String::new(),
            nok_phone: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: None,
            is_active: true,
        };
        assert_eq!(patient.full_name(), "Mrs Ada Okafor");

        let update: PatientUpdate =
            serde_json::from_value(serde_json::json!({"middle_name": "Ngozi", "blood_group": "O+"})).unwrap();
        update.apply(&mut patient);
        assert_eq!(patient.full_name(), "Mrs Ada Ngozi Okafor");
        assert_eq!(patient.blood_group, "O+");
        assert_eq!(patient.division.as_deref(), Some("Ports"));
        assert_eq!(patient.patient_id, "E-A123");
    }
}
