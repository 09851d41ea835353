//! MIME transfer decoding: Base64, Quoted-Printable, RFC 2047 headers.

use crate::charset::decode_charset;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Decodes Base64 data, ignoring embedded whitespace (folded bodies).
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable text (RFC 2045) into raw bytes.
///
/// Charset conversion happens after transfer decoding, so this returns
/// bytes rather than a string.
///
/// # Errors
///
/// Returns an error if the input contains an incomplete escape sequence.
pub fn decode_quoted_printable(text: &str) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(text.len());
    let mut bytes = text.bytes().peekable();

    while let Some(b) = bytes.next() {
        if b == b'=' {
            // Soft line break
            if bytes.peek() == Some(&b'\r') {
                bytes.next();
                if bytes.peek() == Some(&b'\n') {
                    bytes.next();
                }
                continue;
            }
            if bytes.peek() == Some(&b'\n') {
                bytes.next();
                continue;
            }

            let hi = bytes.next();
            let lo = bytes.next();
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    let hex = [hi, lo];
                    let hex = std::str::from_utf8(&hex)
                        .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
                    let byte = u8::from_str_radix(hex, 16)
                        .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
                    result.push(byte);
                }
                _ => {
                    return Err(Error::InvalidEncoding(
                        "Incomplete escape sequence".to_string(),
                    ));
                }
            }
        } else {
            result.push(b);
        }
    }

    Ok(result)
}

/// Decodes a part body according to its transfer encoding.
///
/// 7bit/8bit/binary pass through unchanged. Decode failures fall back to
/// the raw bytes so a bad escape never loses the whole part.
#[must_use]
pub fn decode_transfer(encoding: TransferEncoding, body: &[u8]) -> Vec<u8> {
    match encoding {
        TransferEncoding::Base64 => {
            decode_base64(&String::from_utf8_lossy(body)).unwrap_or_else(|_| body.to_vec())
        }
        TransferEncoding::QuotedPrintable => decode_quoted_printable(&String::from_utf8_lossy(body))
            .unwrap_or_else(|_| body.to_vec()),
        _ => body.to_vec(),
    }
}

/// Decodes RFC 2047 encoded words embedded in a header value.
///
/// Format: `=?charset?encoding?encoded-text?=`. Multiple encoded words may
/// appear in one value; undecodable words are kept verbatim rather than
/// failing the header.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut prev_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match decode_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                // Whitespace between two adjacent encoded words is dropped.
                let gap = prev_was_encoded && !before.is_empty() && before.chars().all(char::is_whitespace);
                if !gap {
                    result.push_str(before);
                }
                result.push_str(&decoded);
                rest = &candidate[consumed..];
                prev_was_encoded = true;
            }
            None => {
                result.push_str(before);
                result.push_str("=?");
                rest = &candidate[2..];
                prev_was_encoded = false;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Decodes a single encoded word at the start of `s`, returning the decoded
/// text and the number of bytes consumed.
fn decode_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let end = inner.find("?=")?;
    let word = &inner[..end];
    let consumed = 2 + end + 2;

    let mut parts = word.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let payload = parts.next()?;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(payload).ok()?,
        "Q" => {
            let with_spaces = payload.replace('_', " ");
            decode_quoted_printable(&with_spaces).ok()?
        }
        _ => return None,
    };

    Some((decode_charset(charset, &bytes), consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("base64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(
            TransferEncoding::parse("unknown"),
            TransferEncoding::SevenBit
        );
    }

    #[test]
    fn test_base64_decode() {
        let decoded = decode_base64("SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_with_line_breaks() {
        let decoded = decode_base64("SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_quoted_printable_decode() {
        let decoded = decode_quoted_printable("H=C3=A9llo").unwrap();
        assert_eq!(decoded, "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode_quoted_printable("Hello=\r\nWorld").unwrap();
        assert_eq!(decoded, b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_incomplete_escape() {
        assert!(decode_quoted_printable("Hello=A").is_err());
    }

    #[test]
    fn test_decode_transfer_fallback_on_bad_base64() {
        let body = b"not base64 at all!!!";
        let decoded = decode_transfer(TransferEncoding::Base64, body);
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_rfc2047_decode_base64() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_rfc2047_decode_q_encoding() {
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo_World?="), "Héllo World");
    }

    #[test]
    fn test_rfc2047_decode_latin1() {
        assert_eq!(decode_rfc2047("=?iso-8859-1?Q?Caf=E9?="), "Café");
    }

    #[test]
    fn test_rfc2047_plain_text_passthrough() {
        assert_eq!(decode_rfc2047("Plain subject"), "Plain subject");
    }

    #[test]
    fn test_rfc2047_mixed_content() {
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?B?SMOpbGxv?= again"),
            "Re: Héllo again"
        );
    }

    #[test]
    fn test_rfc2047_malformed_kept_verbatim() {
        assert_eq!(decode_rfc2047("=?bogus"), "=?bogus");
    }
}
