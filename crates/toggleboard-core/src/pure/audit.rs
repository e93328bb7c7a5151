//! Pure audit log formatting and retention arithmetic.
//!
//! Entries are `YYYY-MM-DD HH:MM:SS|clientKey|index|True|tag` in UTC, appended
//! to one list per calendar day keyed `checkbox_logs:YYYY-MM-DD`.

use chrono::DateTime;
use chrono::Days;
use chrono::NaiveDate;

use crate::constants::AUDIT_LOG_KEY_PREFIX;
use crate::types::AuditRecord;

const DAY_FORMAT: &str = "%Y-%m-%d";
const ENTRY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Calendar day (UTC) containing `timestamp_ms`.
pub fn audit_day(timestamp_ms: u64) -> NaiveDate {
    let millis = i64::try_from(timestamp_ms).unwrap_or(i64::MAX);
    DateTime::from_timestamp_millis(millis).unwrap_or_default().date_naive()
}

/// Store key of the list for `day`.
pub fn audit_key(day: NaiveDate) -> String {
    format!("{AUDIT_LOG_KEY_PREFIX}{}", day.format(DAY_FORMAT))
}

/// Day encoded in an audit list key, `None` for foreign or malformed keys.
pub fn parse_audit_key(key: &str) -> Option<NaiveDate> {
    let day = key.strip_prefix(AUDIT_LOG_KEY_PREFIX)?;
    NaiveDate::parse_from_str(day, DAY_FORMAT).ok()
}

/// Human-readable log line for one record.
pub fn format_entry(record: &AuditRecord) -> String {
    let millis = i64::try_from(record.timestamp_ms).unwrap_or(i64::MAX);
    let at = DateTime::from_timestamp_millis(millis).unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}",
        at.format(ENTRY_TIME_FORMAT),
        record.client_key,
        record.index,
        if record.state { "True" } else { "False" },
        record.tag.as_str()
    )
}

/// True when the list for `day` falls outside a `retention_days` window ending `today`.
pub fn is_expired(day: NaiveDate, today: NaiveDate, retention_days: u32) -> bool {
    match today.checked_sub_days(Days::new(u64::from(retention_days))) {
        Some(cutoff) => day < cutoff,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditTag;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn entry_format() {
        let record = AuditRecord {
            client_key: "203.0.113.9".to_string(),
            index: 42,
            state: true,
            tag: AuditTag::New,
            // 2024-07-01 12:30:05 UTC
            timestamp_ms: 1_719_837_005_000,
        };
        assert_eq!(format_entry(&record), "2024-07-01 12:30:05|203.0.113.9|42|True|new");

        let frozen = AuditRecord {
            state: true,
            tag: AuditTag::Frozen,
            ..record
        };
        assert!(format_entry(&frozen).ends_with("|42|True|frozen"));
    }

    #[test]
    fn day_keys_roundtrip_through_parse() {
        let day = audit_day(1_719_837_005_000);
        assert_eq!(day, date(2024, 7, 1));
        assert_eq!(audit_key(day), "checkbox_logs:2024-07-01");
        assert_eq!(parse_audit_key("checkbox_logs:2024-07-01"), Some(day));
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        assert_eq!(parse_audit_key("count"), None);
        assert_eq!(parse_audit_key("checkbox_logs:yesterday"), None);
    }

    #[test]
    fn retention_window() {
        let today = date(2024, 7, 31);
        assert!(!is_expired(date(2024, 7, 1), today, 30));
        assert!(is_expired(date(2024, 6, 30), today, 30));
        assert!(!is_expired(today, today, 0));
    }
}
