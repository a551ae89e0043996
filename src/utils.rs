use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of store-assigned document identifiers.
pub const DOCUMENT_ID_LEN: usize = 16;

/// Generate a random alphanumeric identifier for a newly inserted document.
pub fn new_document_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_ID_LEN)
        .map(char::from)
        .collect()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored unix milliseconds back into a UTC timestamp.
/// Out-of-range values clamp to the unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// File name for a node's log partition.
///
/// Alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`, so
/// IDs like `../x` or `a/b` stay inside the partition directory and distinct
/// IDs never share a file.
/// Longest partition file name that still leaves room for the `-wal` and
/// `-shm` sidecars within a 255-byte file name.
pub const MAX_PARTITION_FILE_NAME: usize = 251;

pub fn partition_file_name(node_id: &str) -> String {
    let mut name = String::with_capacity(node_id.len() + 3);
    for byte in node_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".db");
    name
}

/// Coerce an externally supplied history limit into a positive count.
///
/// Missing, non-numeric, zero or negative input falls back to `default`.
/// Leading numeric prefixes are honoured (`"25abc"` means 25).
pub fn parse_limit(raw: Option<&str>, default: usize) -> usize {
    let Some(raw) = raw else { return default };
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => default,
        Ok(n) => n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ids_are_alphanumeric_and_distinct() {
        let a = new_document_id();
        let b = new_document_id();
        assert_eq!(a.len(), DOCUMENT_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn millis_roundtrip_through_chrono() {
        let ms = 1_566_424_128_123;
        assert_eq!(from_millis(ms).timestamp_millis(), ms);
        assert_eq!(from_millis(i64::MAX), DateTime::<Utc>::default());
    }

    #[test]
    fn partition_names_escape_path_characters() {
        assert_eq!(partition_file_name("rpi_hub"), "rpi_hub.db");
        assert_eq!(partition_file_name("../etc"), "%2E%2E%2Fetc.db");
        assert_eq!(partition_file_name("a b"), "a%20b.db");
        assert_ne!(partition_file_name("a%20b"), partition_file_name("a b"));
        assert_eq!(partition_file_name(&"a".repeat(248)).len(), MAX_PARTITION_FILE_NAME);
    }

    #[test]
    fn limit_defaults_on_missing_or_garbage() {
        assert_eq!(parse_limit(None, 100), 100);
        assert_eq!(parse_limit(Some(""), 100), 100);
        assert_eq!(parse_limit(Some("abc"), 100), 100);
        assert_eq!(parse_limit(Some("-5"), 100), 100);
        assert_eq!(parse_limit(Some("0"), 100), 100);
        assert_eq!(parse_limit(Some("10"), 100), 10);
        assert_eq!(parse_limit(Some(" 25abc"), 100), 25);
    }
}
