//! Canonical keys: `YYYY-MM-DD` dates, `YYYY-MM` months, document and order keys.

use super::error::{DayStateError, Result};
use chrono::{Datelike, Local, NaiveDate};

pub const ORDER_KEY_SEPARATOR: &str = "::";

/// Parses a canonical `YYYY-MM-DD` key into a calendar date.
pub fn get_date_from_key(key: &str) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .map_err(|err| DayStateError::InvalidDateKey(format!("'{}': {}", key, err)))?;
    // chrono accepts unpadded fields; the key must round-trip exactly.
    if date_key(date) != key {
        return Err(DayStateError::InvalidDateKey(format!(
            "'{}' is not in YYYY-MM-DD form",
            key
        )));
    }
    Ok(date)
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn today_key() -> String {
    date_key(Local::now().date_naive())
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Returns the `YYYY-MM` month owning a date key.
pub fn month_key_for(date_key: &str) -> Result<String> {
    get_date_from_key(date_key).map(month_key)
}

pub fn validate_month_key(key: &str) -> Result<()> {
    let probe = format!("{}-01", key);
    match NaiveDate::parse_from_str(&probe, "%Y-%m-%d") {
        Ok(date) if month_key(date) == key => Ok(()),
        _ => Err(DayStateError::InvalidMonthKey(key.to_string())),
    }
}

/// Stable identity of a document: its task id when known, else its path.
pub fn document_key(task_id: Option<&str>, path: &str) -> String {
    match task_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => path.to_string(),
    }
}

pub fn order_key(doc_key: &str, slot_key: &str) -> String {
    format!("{}{}{}", doc_key, ORDER_KEY_SEPARATOR, slot_key)
}

/// Splits `"<doc>::<slot>"` into its parts. The slot is the segment after the last separator.
pub fn split_order_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(ORDER_KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_key_round_trip() {
        let date = get_date_from_key("2024-03-09").unwrap();
        assert_eq!(date_key(date), "2024-03-09");
        assert_eq!(month_key_for("2024-03-09").unwrap(), "2024-03");
    }

    #[test]
    fn test_rejects_non_canonical_dates() {
        assert!(get_date_from_key("2024-3-9").is_err());
        assert!(get_date_from_key("2024-02-30").is_err());
        assert!(get_date_from_key("yesterday").is_err());
    }

    #[test]
    fn test_month_key_validation() {
        assert!(validate_month_key("2024-12").is_ok());
        assert!(validate_month_key("2024-13").is_err());
        assert!(validate_month_key("2024-1").is_err());
    }

    #[test]
    fn test_document_and_order_keys() {
        assert_eq!(document_key(Some("tc-1"), "A.md"), "tc-1");
        assert_eq!(document_key(Some(""), "A.md"), "A.md");
        assert_eq!(document_key(None, "A.md"), "A.md");

        let key = order_key("A.md", "8:00-12:00");
        assert_eq!(key, "A.md::8:00-12:00");
        assert_eq!(split_order_key(&key), Some(("A.md", "8:00-12:00")));
    }
}
