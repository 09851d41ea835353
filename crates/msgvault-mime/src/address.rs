//! Email address parsing.

use crate::encoding::decode_rfc2047;

/// A parsed email address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    /// Display name, may be empty.
    pub name: String,
    /// Address, lowercased.
    pub email: String,
    /// Domain part of the address, lowercased; empty when absent.
    pub domain: String,
}

impl Address {
    /// Creates an address from a display name and email, deriving the domain.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into().trim().to_lowercase();
        let domain = extract_domain(&email);
        Self {
            name: name.into(),
            email,
            domain,
        }
    }
}

/// Extracts the domain from an email address.
///
/// The domain is the substring after the last `@`, lowercased. Input
/// without an `@` (or empty input) yields an empty string.
#[must_use]
pub fn extract_domain(email: &str) -> String {
    match email.rfind('@') {
        Some(idx) => email[idx + 1..].to_lowercase(),
        None => String::new(),
    }
}

/// Parses an address list header value into individual addresses.
///
/// Handles display names (quoted and bare), angle-bracket addresses, and
/// RFC 2822 group syntax (`team: a@x.com, b@y.com;`), which is flattened
/// into its member list. Empty groups (`undisclosed-recipients:;`) yield
/// an empty list. Display names are RFC 2047 decoded.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<Address> {
    let mut addresses = Vec::new();

    for token in split_mailboxes(value) {
        if let Some(addr) = parse_mailbox(&token) {
            addresses.push(addr);
        }
    }

    addresses
}

/// Splits an address list on commas, respecting quoted strings and
/// angle brackets, and flattening group syntax.
fn split_mailboxes(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(ch);
            }
            // A colon outside quotes starts a group: drop the group name.
            ':' if !in_quotes && !in_angle => {
                current.clear();
            }
            // A semicolon ends a group; treat like a list separator.
            ',' | ';' if !in_quotes && !in_angle => {
                let token = current.trim().to_string();
                if !token.is_empty() {
                    tokens.push(token);
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let token = current.trim().to_string();
    if !token.is_empty() {
        tokens.push(token);
    }

    tokens
}

/// Parses a single mailbox: `Display Name <addr@host>` or a bare address.
fn parse_mailbox(token: &str) -> Option<Address> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if let Some(open) = token.find('<') {
        let close = token[open..].find('>').map(|i| open + i)?;
        let email = token[open + 1..close].trim();
        if email.is_empty() {
            return None;
        }
        let name = token[..open].trim().trim_matches('"').trim();
        return Some(Address::new(decode_rfc2047(name), email));
    }

    // Bare address; require an @ so stray words are not treated as mail.
    if !token.contains('@') {
        return None;
    }
    Some(Address::new("", token.trim_matches('"')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("user@example.com"), "example.com");
        assert_eq!(extract_domain("USER@EXAMPLE.COM"), "example.com");
        assert_eq!(extract_domain("user@sub.domain.org"), "sub.domain.org");
        assert_eq!(extract_domain("nodomain"), "");
        assert_eq!(extract_domain(""), "");
        assert_eq!(extract_domain("@domain.com"), "domain.com");
    }

    #[test]
    fn test_parse_bare_address() {
        let addrs = parse_address_list("alice@example.com");
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].email, "alice@example.com");
        assert_eq!(addrs[0].name, "");
        assert_eq!(addrs[0].domain, "example.com");
    }

    #[test]
    fn test_parse_named_address() {
        let addrs = parse_address_list("\"John Doe\" <john@example.com>");
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].name, "John Doe");
        assert_eq!(addrs[0].email, "john@example.com");
    }

    #[test]
    fn test_parse_unquoted_name() {
        let addrs = parse_address_list("Jane Smith <jane@example.com>");
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].name, "Jane Smith");
    }

    #[test]
    fn test_parse_multiple_addresses() {
        let addrs = parse_address_list("\"Jane Smith\" <jane@example.com>, bob@example.com");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "jane@example.com");
        assert_eq!(addrs[1].email, "bob@example.com");
    }

    #[test]
    fn test_parse_empty_group() {
        let addrs = parse_address_list("undisclosed-recipients:;");
        assert!(addrs.is_empty());
    }

    #[test]
    fn test_parse_group_with_members() {
        let addrs = parse_address_list("team: alice@example.com, bob@example.com;");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "alice@example.com");
        assert_eq!(addrs[1].email, "bob@example.com");
    }

    #[test]
    fn test_parse_comma_in_quoted_name() {
        let addrs = parse_address_list("\"Doe, John\" <john@example.com>");
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].name, "Doe, John");
    }

    #[test]
    fn test_parse_uppercase_email_lowered() {
        let addrs = parse_address_list("ALICE@EXAMPLE.COM");
        assert_eq!(addrs[0].email, "alice@example.com");
    }

    #[test]
    fn test_parse_encoded_display_name() {
        let addrs = parse_address_list("=?utf-8?B?SsO8cmdlbg==?= <j@example.de>");
        assert_eq!(addrs[0].name, "Jürgen");
        assert_eq!(addrs[0].email, "j@example.de");
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse_address_list("").is_empty());
        assert!(parse_address_list("   ").is_empty());
    }
}
