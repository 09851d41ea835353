//! Date header parsing.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses a Date header value, normalized to UTC.
///
/// Tries a fixed ordered list of formats: RFC 2822 (with or without
/// weekday, tolerating doubled spaces and a trailing parenthesized zone
/// name), ISO 8601, and SQL-like timestamps with or without an offset.
/// Unparseable input returns `None`; malformed dates are common in email
/// and must not fail the whole message, so callers fall back to the
/// server-side internal date.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let cleaned = normalize(value);
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(&cleaned, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }

    // SQL-like timestamp with no offset; assumed UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    None
}

/// Strips a trailing parenthesized zone comment and collapses runs of
/// spaces (`Mon,  2 Dec 2024 ... +0000 (UTC)` appears in real mail).
fn normalize(value: &str) -> String {
    let mut s = value.trim();

    if s.ends_with(')') {
        if let Some(open) = s.rfind('(') {
            s = s[..open].trim_end();
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut last_space = false;
    for ch in s.chars() {
        if ch == ' ' {
            if !last_space {
                out.push(ch);
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// Splits a References header into message IDs with angle brackets removed.
#[must_use]
pub fn parse_references(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|id| id.trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_valid_formats() {
        let valid = [
            "Mon, 02 Jan 2006 15:04:05 -0700",
            "Mon, 2 Jan 2006 15:04:05 MST",
            "02 Jan 2006 15:04:05 -0700",
            "Mon, 02 Jan 2006 15:04:05 -0700 (PST)",
            "Mon,  2 Dec 2024 11:42:03 +0000 (UTC)", // doubled space after comma
            "2006-01-02T15:04:05Z",
            "2006-01-02T15:04:05-07:00",
            "2006-01-02 15:04:05 -0700",
            "2006-01-02 15:04:05",
        ];

        for input in valid {
            assert!(parse_date(input).is_some(), "should parse: {input}");
        }
    }

    #[test]
    fn test_parse_date_invalid_returns_none() {
        let invalid = ["", "not a date", "2006-01-02", "January 2, 2006"];
        for input in invalid {
            assert_eq!(parse_date(input), None, "should not parse: {input}");
        }
    }

    #[test]
    fn test_parse_date_normalized_to_utc() {
        let got = parse_date("Mon, 02 Jan 2006 15:04:05 -0700").unwrap();
        let want = Utc.with_ymd_and_hms(2006, 1, 2, 22, 4, 5).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_parse_date_double_space_paren_zone() {
        let got = parse_date("Mon,  2 Dec 2024 11:42:03 +0000 (UTC)").unwrap();
        let want = Utc.with_ymd_and_hms(2024, 12, 2, 11, 42, 3).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_parse_date_sql_assumes_utc() {
        let got = parse_date("2024-06-15 08:30:00").unwrap();
        let want = Utc.with_ymd_and_hms(2024, 6, 15, 8, 30, 0).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(
            parse_references("<abc@example.com>"),
            vec!["abc@example.com"]
        );
        assert_eq!(
            parse_references("<a@x.com> <b@y.com>"),
            vec!["a@x.com", "b@y.com"]
        );
        assert_eq!(
            parse_references("<a@x.com>\n\t<b@y.com>"),
            vec!["a@x.com", "b@y.com"]
        );
        assert!(parse_references("").is_empty());
        assert!(parse_references("   ").is_empty());
    }
}
