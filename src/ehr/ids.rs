//! Human-readable record identifiers.
//!
//! Uniqueness is checked against the table by `allocate_unique`; these
//! functions only format candidates.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

/// `E-{PN}` / `R-{PN}`, then `E-{PN}-1`, `E-{PN}-2` ... on collision.
pub fn staff_patient_id(prefix: &str, personal_number: &str, attempt: u32) -> String {
    let base = format!("{prefix}-{}", personal_number.trim().to_uppercase());
    if attempt == 0 {
        base
    } else {
        format!("{base}-{attempt}")
    }
}

/// `{base}-{seq}` zero padded to `width` digits.
pub fn sequenced(base: &str, seq: i64, width: usize) -> String {
    format!("{base}-{seq:0width$}")
}

/// `{prefix}-YYYYMMDD-{seq}`, e.g. `VIS-20250314-0007`.
pub fn date_scoped(prefix: &str, date: NaiveDate, seq: i64, width: usize) -> String {
    format!("{prefix}-{}-{seq:0width$}", date.format("%Y%m%d"))
}

/// `{prefix}-YYYYMMDD-` used to find the day's existing identifiers.
pub fn date_prefix(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}-", date.format("%Y%m%d"))
}

/// `{prefix}-YYYYMMDD-HHMMSS-XXXX` with a random four digit suffix.
pub fn timestamped(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("{prefix}-{}-{suffix}", now.format("%Y%m%d-%H%M%S"))
}

/// `REF-YYYY-NNNNNN`.
pub fn referral_id(year: i32, seq: i64) -> String {
    format!("REF-{year}-{seq:06}")
}

/// Numeric tail of an identifier such as `SESS-20250314-000042`.
pub fn trailing_number(id: &str) -> Option<i64> {
    id.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case("E", " ab123 ", 0, "E-AB123" ; "employee first attempt")]
    #[test_case("R", "77", 0, "R-77" ; "retiree")]
    #[test_case("E", "AB123", 2, "E-AB123-2" ; "collision suffix")]
    fn staff_ids(prefix: &str, pn: &str, attempt: u32, expected: &str) {
        assert_eq!(staff_patient_id(prefix, pn, attempt), expected);
    }

    #[test]
    fn dependent_and_nonnpa_sequences() {
        assert_eq!(sequenced("E-AB123", 1, 2), "E-AB123-01");
        assert_eq!(sequenced("NN-CONTRACTOR", 12, 2), "NN-CONTRACTOR-12");
        assert_eq!(sequenced("NN-X", 100, 2), "NN-X-100");
    }

    #[test]
    fn visit_style_ids() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(date_scoped("VIS", date, 7, 4), "VIS-20250314-0007");
        assert_eq!(date_scoped("SESS", date, 42, 6), "SESS-20250314-000042");
        assert_eq!(date_prefix("LAB", date), "LAB-20250314-");
    }

    #[test]
    fn timestamped_ids_have_four_digit_suffix() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 5, 30).unwrap();
        let id = timestamped("RX", now);
        assert!(id.starts_with("RX-20250314-090530-"));
        let suffix: u32 = id.rsplit('-').next().unwrap().parse().unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn referral_format() {
        assert_eq!(referral_id(2025, 3), "REF-2025-000003");
    }

    #[test_case("SESS-20250314-000042", Some(42))]
    #[test_case("REF-2025-000003", Some(3))]
    #[test_case("garbage", None)]
    fn trailing_numbers(id: &str, expected: Option<i64>) {
        assert_eq!(trailing_number(id), expected);
    }
}
