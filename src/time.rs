//! Time related utils.

use chrono::SecondsFormat;
use chrono::Utc;

/// DateTime used in artvault, always in UTC.
pub type DateTime = chrono::DateTime<Utc>;

/// Return the current time.
pub fn now() -> DateTime {
    Utc::now()
}

/// Format a time into an RFC 3339 string without sub-second digits,
/// e.g. `2022-03-01T08:12:34Z`. This is the format SAS fields are
/// signed over.
pub fn format_rfc3339(t: DateTime) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a time into an HTTP date string, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`, as required by the `x-ms-date`
/// header.
pub fn format_http_date(t: DateTime) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_rfc3339() {
        let t = Utc.with_ymd_and_hms(2022, 3, 1, 8, 12, 34).unwrap();
        assert_eq!(format_rfc3339(t), "2022-03-01T08:12:34Z");
    }

    #[test]
    fn test_format_http_date() {
        let t = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(format_http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
