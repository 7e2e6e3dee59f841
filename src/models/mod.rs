//! Record types and request payloads.

pub mod accounts;
pub mod appointment;
pub mod audit;
pub mod consultation;
pub mod laboratory;
pub mod notification;
pub mod nursing;
pub mod organization;
pub mod patient;
pub mod permissions;
pub mod pharmacy;
pub mod radiology;
pub mod report;
pub mod visit;

use validator::ValidationError;

pub(crate) fn invalid_choice(message: &'static str) -> ValidationError {
    let mut error = ValidationError::new("invalid_choice");
    error.message = Some(message.into());
    error
}

/// `+` optional, then an optional leading 1, then 9 to 15 digits.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let digits = match digits.strip_prefix('1') {
        Some(rest) if (9..=15).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => digits,
    };
    if (9..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        let mut error = ValidationError::new("phone");
        error.message = Some(
            "Phone number must be entered in the format: '+999999999'. Up to 15 digits allowed.".into(),
        );
        Err(error)
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
