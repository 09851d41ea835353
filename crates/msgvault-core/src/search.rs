//! Gmail-like search query parsing.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

/// A parsed search query.
///
/// Text terms are combined with AND; typed filters narrow the result set
/// further.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Full-text search terms (bare words and quoted phrases).
    pub text_terms: Vec<String>,
    /// `from:` filters.
    pub from_addrs: Vec<String>,
    /// `to:` filters.
    pub to_addrs: Vec<String>,
    /// `cc:` filters.
    pub cc_addrs: Vec<String>,
    /// `bcc:` filters.
    pub bcc_addrs: Vec<String>,
    /// `subject:` filters.
    pub subject_terms: Vec<String>,
    /// `label:` / `l:` filters.
    pub labels: Vec<String>,
    /// `has:attachment`.
    pub has_attachment: Option<bool>,
    /// Upper bound from `before:` or `older_than:`.
    pub before_date: Option<DateTime<Utc>>,
    /// Lower bound from `after:` or `newer_than:`.
    pub after_date: Option<DateTime<Utc>>,
    /// Lower size bound in bytes from `larger:`.
    pub larger_than: Option<i64>,
    /// Upper size bound in bytes from `smaller:`.
    pub smaller_than: Option<i64>,
    /// `in:<account>` filter.
    pub account: Option<String>,
}

impl Query {
    /// Returns true when the query has no criteria at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_terms.is_empty()
            && self.from_addrs.is_empty()
            && self.to_addrs.is_empty()
            && self.cc_addrs.is_empty()
            && self.bcc_addrs.is_empty()
            && self.subject_terms.is_empty()
            && self.labels.is_empty()
            && self.has_attachment.is_none()
            && self.before_date.is_none()
            && self.after_date.is_none()
            && self.larger_than.is_none()
            && self.smaller_than.is_none()
            && self.account.is_none()
    }
}

/// Parses a Gmail-like search query string.
///
/// Supported operators: `from:`, `to:`, `cc:`, `bcc:`, `subject:`,
/// `label:`/`l:`, `has:attachment`, `before:`/`after:` (several date
/// forms), `older_than:`/`newer_than:` (`7d`, `2w`, `1m`, `1y`),
/// `larger:`/`smaller:` (with `K`/`M`/`G` suffixes), `in:<account>`.
/// Bare words and quoted phrases become text terms; inside `op:"value"`,
/// the quotes bind to the value and may contain colons.
#[must_use]
pub fn parse(query_str: &str) -> Query {
    let mut query = Query::default();

    for token in tokenize(query_str) {
        // A standalone quoted phrase stays one text term.
        if token.len() > 2 && token.starts_with('"') && token.ends_with('"') {
            query.text_terms.push(token[1..token.len() - 1].to_string());
            continue;
        }

        let Some(colon) = token.find(':') else {
            query.text_terms.push(token);
            continue;
        };

        let op = token[..colon].to_lowercase();
        let mut value = &token[colon + 1..];
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        match op.as_str() {
            "from" => query.from_addrs.push(value.to_lowercase()),
            "to" => query.to_addrs.push(value.to_lowercase()),
            "cc" => query.cc_addrs.push(value.to_lowercase()),
            "bcc" => query.bcc_addrs.push(value.to_lowercase()),
            "subject" => query.subject_terms.push(value.to_string()),
            "label" | "l" => query.labels.push(value.to_string()),
            "has" => {
                let value = value.to_lowercase();
                if value == "attachment" || value == "attachments" {
                    query.has_attachment = Some(true);
                }
            }
            "before" => {
                if let Some(date) = parse_date(value) {
                    query.before_date = Some(date);
                }
            }
            "after" => {
                if let Some(date) = parse_date(value) {
                    query.after_date = Some(date);
                }
            }
            "older_than" => {
                if let Some(date) = parse_relative_date(value) {
                    query.before_date = Some(date);
                }
            }
            "newer_than" => {
                if let Some(date) = parse_relative_date(value) {
                    query.after_date = Some(date);
                }
            }
            "larger" => {
                if let Some(size) = parse_size(value) {
                    query.larger_than = Some(size);
                }
            }
            "smaller" => {
                if let Some(size) = parse_size(value) {
                    query.smaller_than = Some(size);
                }
            }
            "in" => {
                if !value.is_empty() {
                    query.account = Some(value.to_string());
                }
            }
            // Unknown operator: treat the whole token as text.
            _ => query.text_terms.push(token),
        }
    }

    query
}

/// Splits a query string, preserving quoted phrases and keeping
/// `op:"value"` together as one token (quote opened right after a colon).
fn tokenize(query_str: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut after_colon = false;
    let mut op_quoted = false;

    for ch in query_str.chars() {
        if (ch == '"' || ch == '\'') && !in_quotes {
            in_quotes = true;
            quote_char = ch;
            op_quoted = after_colon;
            if !after_colon && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if after_colon {
                current.push(ch);
            }
            after_colon = false;
        } else if ch == quote_char && in_quotes {
            in_quotes = false;
            if op_quoted {
                current.push(ch);
                tokens.push(std::mem::take(&mut current));
            } else if !current.is_empty() {
                tokens.push(format!("\"{current}\""));
                current.clear();
            }
            quote_char = ' ';
            op_quoted = false;
        } else if ch == ' ' && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            after_colon = false;
        } else {
            current.push(ch);
            after_colon = ch == ':';
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Parses absolute dates: `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY`,
/// `DD/MM/YYYY` (first match wins).
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// Parses relative dates like `7d`, `2w`, `1m`, `1y` into an absolute
/// instant in the past.
///
/// Months and years use calendar arithmetic, not a fixed day count, so
/// `1m` means the same day last month regardless of month length.
fn parse_relative_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().to_lowercase();
    if value.len() < 2 {
        return None;
    }

    let (amount, unit) = value.split_at(value.len() - 1);
    let amount: u32 = amount.parse().ok()?;
    let now = Utc::now();

    match unit {
        "d" => Some(now - Duration::days(i64::from(amount))),
        "w" => Some(now - Duration::weeks(i64::from(amount))),
        "m" => now.checked_sub_months(Months::new(amount)),
        "y" => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
        _ => None,
    }
}

/// Parses sizes like `5M`, `100K`, `1G`, `2MB`, or plain byte counts.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn parse_size(value: &str) -> Option<i64> {
    let value = value.trim().to_uppercase();

    for (suffix, multiplier) in [
        ("KB", 1024_i64),
        ("MB", 1024 * 1024),
        ("GB", 1024 * 1024 * 1024),
        ("K", 1024),
        ("M", 1024 * 1024),
        ("G", 1024 * 1024 * 1024),
    ] {
        if let Some(number) = value.strip_suffix(suffix) {
            let number: f64 = number.parse().ok()?;
            return Some((number * multiplier as f64) as i64);
        }
    }

    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operators() {
        let query = parse("from:alice@example.com to:bob@example.com hello world");
        assert_eq!(query.from_addrs, vec!["alice@example.com"]);
        assert_eq!(query.to_addrs, vec!["bob@example.com"]);
        assert_eq!(query.text_terms, vec!["hello", "world"]);
    }

    #[test]
    fn test_operators_lowercase_addresses() {
        let query = parse("FROM:Alice@Example.COM cc:BOB@x.com bcc:c@y.com");
        assert_eq!(query.from_addrs, vec!["alice@example.com"]);
        assert_eq!(query.cc_addrs, vec!["bob@x.com"]);
        assert_eq!(query.bcc_addrs, vec!["c@y.com"]);
    }

    #[test]
    fn test_quoted_phrase() {
        let query = parse("\"exact phrase here\" other");
        assert_eq!(query.text_terms, vec!["exact phrase here", "other"]);
    }

    #[test]
    fn test_quoted_phrase_with_colon_is_text() {
        let query = parse("\"note: remember this\"");
        assert_eq!(query.text_terms, vec!["note: remember this"]);
        assert!(query.from_addrs.is_empty());
    }

    #[test]
    fn test_quoted_operator_value() {
        let query = parse("subject:\"foo bar\"");
        assert_eq!(query.subject_terms, vec!["foo bar"]);
        assert!(query.text_terms.is_empty());
    }

    #[test]
    fn test_quoted_operator_value_with_colon() {
        let query = parse("subject:\"Re: the plan\"");
        assert_eq!(query.subject_terms, vec!["Re: the plan"]);
    }

    #[test]
    fn test_has_attachment() {
        assert_eq!(parse("has:attachment").has_attachment, Some(true));
        assert_eq!(parse("has:attachments").has_attachment, Some(true));
        assert_eq!(parse("has:nothing").has_attachment, None);
    }

    #[test]
    fn test_labels() {
        let query = parse("label:important l:work");
        assert_eq!(query.labels, vec!["important", "work"]);
    }

    #[test]
    fn test_dates() {
        let query = parse("after:2024-01-01 before:2024-06-30");
        assert_eq!(
            query.after_date.unwrap().format("%Y-%m-%d").to_string(),
            "2024-01-01"
        );
        assert_eq!(
            query.before_date.unwrap().format("%Y-%m-%d").to_string(),
            "2024-06-30"
        );
    }

    #[test]
    fn test_date_variants() {
        assert!(parse("before:2024/06/30").before_date.is_some());
        assert!(parse("before:06/30/2024").before_date.is_some());
        assert!(parse("before:garbage").before_date.is_none());
    }

    #[test]
    fn test_relative_dates() {
        let now = Utc::now();
        let week_ago = parse("older_than:7d").before_date.unwrap();
        assert!((now - week_ago).num_days() >= 6);
        assert!((now - week_ago).num_days() <= 8);

        assert!(parse("newer_than:2w").after_date.is_some());
        assert!(parse("older_than:1m").before_date.is_some());
        assert!(parse("older_than:1y").before_date.is_some());
        assert!(parse("older_than:xyz").before_date.is_none());
    }

    #[test]
    fn test_relative_dates_use_calendar_months() {
        // Calendar arithmetic: twelve months back and one year back land
        // on the same cutoff, which a fixed 30-day month cannot do.
        let months = parse("older_than:12m").before_date.unwrap();
        let year = parse("older_than:1y").before_date.unwrap();
        assert!((months - year).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(parse("larger:5M").larger_than, Some(5 * 1024 * 1024));
        assert_eq!(parse("smaller:100K").smaller_than, Some(100 * 1024));
        assert_eq!(parse("larger:1G").larger_than, Some(1024 * 1024 * 1024));
        assert_eq!(parse("larger:2MB").larger_than, Some(2 * 1024 * 1024));
        assert_eq!(parse("larger:512").larger_than, Some(512));
        assert_eq!(parse("larger:abc").larger_than, None);
    }

    #[test]
    fn test_account_filter() {
        let query = parse("in:work@example.com report");
        assert_eq!(query.account.as_deref(), Some("work@example.com"));
        assert_eq!(query.text_terms, vec!["report"]);
    }

    #[test]
    fn test_unknown_operator_is_text() {
        let query = parse("weird:thing hello");
        assert_eq!(query.text_terms, vec!["weird:thing", "hello"]);
    }

    #[test]
    fn test_complex_query() {
        let query = parse(
            "from:boss@corp.com subject:\"quarterly report\" has:attachment larger:1M after:2024-01-01 urgent",
        );
        assert_eq!(query.from_addrs, vec!["boss@corp.com"]);
        assert_eq!(query.subject_terms, vec!["quarterly report"]);
        assert_eq!(query.has_attachment, Some(true));
        assert_eq!(query.larger_than, Some(1024 * 1024));
        assert!(query.after_date.is_some());
        assert_eq!(query.text_terms, vec!["urgent"]);
    }

    #[test]
    fn test_is_empty() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
        assert!(!parse("hello").is_empty());
        assert!(!parse("has:attachment").is_empty());
    }
}
