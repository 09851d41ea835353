//! Charset decoding for message bodies and headers.

use encoding_rs::{
    BIG5, EUC_JP, EUC_KR, Encoding, GBK, KOI8_R, SHIFT_JIS, UTF_8, WINDOWS_1252,
};

/// Resolves a charset label to a decoder.
///
/// The alias table covers the charsets observed in real mailboxes; labels
/// are matched after trimming and lowercasing. `iso-8859-1` maps to
/// windows-1252, which is a superset and what mail agents actually send.
fn lookup(label: &str) -> Option<&'static Encoding> {
    match label.trim().to_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => Some(UTF_8),
        "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Some(WINDOWS_1252),
        "windows-1252" | "cp1252" => Some(WINDOWS_1252),
        "shift_jis" | "shift-jis" | "sjis" => Some(SHIFT_JIS),
        "euc-jp" => Some(EUC_JP),
        "euc-kr" => Some(EUC_KR),
        "gbk" | "gb2312" => Some(GBK),
        "big5" => Some(BIG5),
        "koi8-r" => Some(KOI8_R),
        _ => None,
    }
}

/// Decodes bytes in the given charset to a UTF-8 string.
///
/// Unknown charsets decode best-effort as windows-1252; malformed
/// sequences become U+FFFD either way, so this never fails.
#[must_use]
pub fn decode_charset(label: &str, bytes: &[u8]) -> String {
    let encoding = lookup(label).unwrap_or(WINDOWS_1252);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Decodes bytes with an optional charset label, defaulting to UTF-8.
#[must_use]
pub fn decode_charset_or_utf8(label: Option<&str>, bytes: &[u8]) -> String {
    match label {
        Some(label) => decode_charset(label, bytes),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}
