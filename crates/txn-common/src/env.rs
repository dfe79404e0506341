//! Environment variable helpers
//!
//! Blank values are treated the same as unset ones, so a `.env` file with
//! `DATABASE_PORT=` falls back to the default instead of failing to parse.

use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read a variable, returning `None` when it is unset or blank
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable that must be present
pub fn required(key: &str) -> Result<String> {
    var(key).ok_or_else(|| CommonError::Missing(key.to_string()))
}

/// Read and parse a variable; unset is `Ok(None)`, unparseable is an error
pub fn parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::invalid_value(key, raw, e)),
        None => Ok(None),
    }
}

/// Read a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`)
pub fn flag(key: &str) -> Result<Option<bool>> {
    match var(key) {
        Some(raw) => parse_flag(&raw)
            .map(Some)
            .ok_or_else(|| CommonError::invalid_value(key, raw, "expected a boolean")),
        None => Ok(None),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("yes"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("Off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_blank_is_unset() {
        std::env::set_var("TXN_COMMON_TEST_BLANK", "   ");
        assert_eq!(var("TXN_COMMON_TEST_BLANK"), None);
        assert!(matches!(
            required("TXN_COMMON_TEST_BLANK"),
            Err(CommonError::Missing(_))
        ));
        std::env::remove_var("TXN_COMMON_TEST_BLANK");
    }

    #[test]
    fn test_parsed_reports_key_and_value() {
        std::env::set_var("TXN_COMMON_TEST_PORT", "not-a-port");
        let err = parsed::<u16>("TXN_COMMON_TEST_PORT").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("TXN_COMMON_TEST_PORT"));
        assert!(message.contains("not-a-port"));
        std::env::remove_var("TXN_COMMON_TEST_PORT");

        assert_eq!(parsed::<u16>("TXN_COMMON_TEST_PORT").unwrap(), None);
    }
}
