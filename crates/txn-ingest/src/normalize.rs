//! Field normalization and format checks
//!
//! Small pure steps composed by the validator. Nothing here touches the
//! database, so every rule can be exercised directly in unit tests.

use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use sqlx::types::BigDecimal;

/// Indian country calling code, as it appears once the `+` is stripped
const COUNTRY_CODE: &str = "91";

/// Subscriber numbers are always this long
const PHONE_DIGITS: usize = 10;

/// Accepted timestamp layouts; `%.f` also matches an absent fraction
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

const EMAIL_PATTERN: &str = r"^[\w.-]+@[\w.-]+\.\w+$";

/// Remove every character that is not an ASCII digit
pub fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Drop a `91` country code or a trunk `0` when what remains is a full number
pub fn strip_phone_prefix(digits: &str) -> &str {
    if digits.len() == COUNTRY_CODE.len() + PHONE_DIGITS && digits.starts_with(COUNTRY_CODE) {
        &digits[COUNTRY_CODE.len()..]
    } else if digits.len() == 1 + PHONE_DIGITS && digits.starts_with('0') {
        &digits[1..]
    } else {
        digits
    }
}

/// Normalize a phone number to its bare digits
///
/// `"+91-98765-43210"`, `"919876543210"` and `"09876543210"` all become
/// `"9876543210"`. Anything else is returned as cleaned digits and left to
/// [`is_valid_phone`] to judge.
pub fn normalize_phone(raw: &str) -> String {
    strip_phone_prefix(&strip_non_digits(raw)).to_string()
}

/// Exactly ten digits with a leading 6, 7, 8 or 9
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == PHONE_DIGITS
        && phone.bytes().all(|b| b.is_ascii_digit())
        && matches!(phone.as_bytes()[0], b'6'..=b'9')
}

/// Trim surrounding whitespace and lowercase
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Parse a source timestamp, `None` when no accepted layout matches
///
/// Second 60 is rejected; chrono would keep it as a leap second.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .filter(|ts| ts.nanosecond() < 1_000_000_000)
}

/// Parse an optional decimal column
///
/// Blank or missing values are `Ok(None)`; text that is not a number is `Err(())`.
#[allow(clippy::result_unit_err)]
pub fn parse_decimal(raw: Option<&str>) -> Result<Option<BigDecimal>, ()> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => BigDecimal::from_str(value).map(Some).map_err(|_| ()),
        None => Ok(None),
    }
}

/// Trim optional text, mapping blank to `None`
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Email shape check (`local@domain.tld`)
#[derive(Debug, Clone)]
pub struct EmailValidator {
    pattern: Regex,
}

impl EmailValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(EMAIL_PATTERN)?,
        })
    }

    /// Check an already normalized address
    pub fn is_valid(&self, email: &str) -> bool {
        self.pattern.is_match(email)
    }
}
