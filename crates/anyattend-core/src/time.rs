//! Wire-level instants.
//!
//! Storage keeps Unix seconds; everything that crosses the wire (and
//! everything that gets signed) uses RFC 3339 UTC with second precision and
//! a `Z` suffix, e.g. `2026-10-15T09:30:00Z`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a Unix timestamp as an RFC 3339 UTC instant.
///
/// Timestamps outside chrono's representable range fall back to the epoch.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 instant (any offset) into Unix seconds.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn formats_utc_with_z_suffix() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_760_520_600), "2025-10-15T09:30:00Z");
    }

    #[test]
    fn parses_offsets_into_utc_seconds() {
        assert_eq!(parse_timestamp("2025-10-15T09:30:00Z"), Some(1_760_520_600));
        assert_eq!(
            parse_timestamp("2025-10-15T11:30:00+02:00"),
            Some(1_760_520_600)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
