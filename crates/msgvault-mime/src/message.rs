//! MIME message parsing into the normalized form ingestion consumes.

use chrono::{DateTime, Utc};

use crate::address::{Address, parse_address_list};
use crate::charset::decode_charset_or_utf8;
use crate::content_type::{ContentType, Disposition};
use crate::date::{parse_date, parse_references};
use crate::encoding::{TransferEncoding, decode_transfer};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::html::strip_html;

/// An attachment extracted from a message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    /// Filename from the disposition or content-type name parameter.
    pub filename: String,
    /// MIME type, e.g. `application/pdf`.
    pub mime_type: String,
    /// Decoded content bytes.
    pub data: Vec<u8>,
}

/// A parsed email message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// From addresses.
    pub from: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// Decoded subject.
    pub subject: String,
    /// Plain text body, or the parse-failure placeholder.
    pub body_text: String,
    /// HTML body, if any.
    pub body_html: String,
    /// Parsed Date header, normalized to UTC; `None` when unparseable.
    pub date: Option<DateTime<Utc>>,
    /// Message-ID with angle brackets stripped.
    pub message_id: String,
    /// In-Reply-To message ID.
    pub in_reply_to: String,
    /// References message IDs.
    pub references: Vec<String>,
    /// Extracted attachments.
    pub attachments: Vec<AttachmentPart>,
    /// Non-fatal field errors accumulated during parsing.
    pub errors: Vec<String>,
}

impl Message {
    /// Returns the body text, falling back to stripped HTML.
    #[must_use]
    pub fn body_text_or_html(&self) -> String {
        if !self.body_text.is_empty() {
            return self.body_text.clone();
        }
        if !self.body_html.is_empty() {
            return strip_html(&self.body_html);
        }
        String::new()
    }

    /// Returns the first From address, or a default when absent.
    #[must_use]
    pub fn first_from(&self) -> Address {
        self.from.first().cloned().unwrap_or_default()
    }

    /// Builds a placeholder message for raw bytes that failed to parse.
    ///
    /// Ingestion stores this so the message row still exists; the raw MIME
    /// is preserved separately for a later reparse.
    #[must_use]
    pub fn parse_failure(reason: &str) -> Self {
        Self {
            body_text: format!("MIME parsing failed: {reason}"),
            errors: vec![reason.to_string()],
            ..Self::default()
        }
    }
}

/// Parses raw RFC 822 bytes into a [`Message`].
///
/// # Errors
///
/// Returns an error only for structural failures (empty input, no
/// parseable headers). Field-level problems are accumulated in
/// [`Message::errors`] instead.
pub fn parse(raw: &[u8]) -> Result<Message> {
    if raw.is_empty() {
        return Err(Error::Parse("empty message".to_string()));
    }

    let (header_bytes, body) = split_header_block(raw);
    let (headers, _) = Headers::parse(&String::from_utf8_lossy(header_bytes));
    if headers.is_empty() {
        return Err(Error::Parse("no headers found".to_string()));
    }

    let mut msg = Message {
        from: headers.get("from").map(parse_address_list).unwrap_or_default(),
        to: headers.get("to").map(parse_address_list).unwrap_or_default(),
        cc: headers.get("cc").map(parse_address_list).unwrap_or_default(),
        bcc: headers.get("bcc").map(parse_address_list).unwrap_or_default(),
        subject: headers.get_decoded("subject").unwrap_or_default(),
        date: headers.get("date").and_then(parse_date),
        message_id: headers
            .get("message-id")
            .map(strip_angle_brackets)
            .unwrap_or_default(),
        in_reply_to: headers
            .get("in-reply-to")
            .map(strip_angle_brackets)
            .unwrap_or_default(),
        references: headers
            .get("references")
            .map(parse_references)
            .unwrap_or_default(),
        ..Message::default()
    };

    // Sender is folded into From when it names a distinct mailbox.
    if let Some(sender) = headers.get("sender") {
        for addr in parse_address_list(sender) {
            if !msg.from.iter().any(|a| a.email == addr.email) {
                msg.from.push(addr);
            }
        }
    }

    walk_part(&headers, body, &mut msg);

    Ok(msg)
}

/// Parses raw bytes, substituting a placeholder message on structural
/// failure so the caller can always persist something.
#[must_use]
pub fn parse_lenient(raw: &[u8]) -> Message {
    match parse(raw) {
        Ok(msg) => msg,
        Err(err) => Message::parse_failure(&err.to_string()),
    }
}

/// Decides whether a part is body content rather than an attachment.
///
/// A part is body when its content type is `text/*`, its disposition is
/// not `attachment`, and no filename is present on either header.
fn is_body_part(content_type: &ContentType, disposition: &Disposition) -> bool {
    content_type.is_text()
        && !disposition.is_attachment()
        && disposition.filename.is_none()
        && content_type.name().is_none()
}

/// Recursively walks a part, accumulating bodies and attachments.
fn walk_part(headers: &Headers, body: &[u8], msg: &mut Message) {
    let content_type = match headers.get("content-type") {
        Some(value) => match ContentType::parse(value) {
            Ok(ct) => ct,
            Err(err) => {
                msg.errors.push(format!("content-type: {err}"));
                ContentType::text_plain()
            }
        },
        None => ContentType::text_plain(),
    };

    if content_type.is_multipart() {
        let Some(boundary) = content_type.boundary() else {
            // Multipart with no boundary: salvage the body as text.
            msg.errors.push("multipart without boundary".to_string());
            append_text_body(&content_type, headers, body, msg);
            return;
        };

        for part in split_multipart(body, boundary) {
            let (part_header_bytes, part_body) = split_header_block(part);
            let (part_headers, _) = Headers::parse(&String::from_utf8_lossy(part_header_bytes));
            walk_part(&part_headers, part_body, msg);
        }
        return;
    }

    let disposition = headers
        .get("content-disposition")
        .map(Disposition::parse)
        .unwrap_or_default();

    if is_body_part(&content_type, &disposition) {
        append_text_body(&content_type, headers, body, msg);
        return;
    }

    let encoding = headers
        .get("content-transfer-encoding")
        .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);
    let data = decode_transfer(encoding, trim_newlines(body));
    let filename = disposition
        .filename
        .or_else(|| content_type.name().map(ToString::to_string))
        .unwrap_or_default();

    msg.attachments.push(AttachmentPart {
        filename,
        mime_type: content_type.mime_type(),
        data,
    });
}

/// Decodes a text part and appends it to the right body slot.
fn append_text_body(content_type: &ContentType, headers: &Headers, body: &[u8], msg: &mut Message) {
    let encoding = headers
        .get("content-transfer-encoding")
        .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);
    let bytes = decode_transfer(encoding, body);
    let text = decode_charset_or_utf8(content_type.charset(), &bytes);
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return;
    }

    let slot = if content_type.sub_type.eq_ignore_ascii_case("html") {
        &mut msg.body_html
    } else {
        &mut msg.body_text
    };
    if !slot.is_empty() {
        slot.push('\n');
    }
    slot.push_str(text);
}

/// Splits raw bytes at the first blank line into header and body sections.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\n' {
            if raw[i + 1..].starts_with(b"\r\n") {
                return (&raw[..i + 1], &raw[i + 3..]);
            }
            if raw[i + 1..].starts_with(b"\n") {
                return (&raw[..i + 1], &raw[i + 2..]);
            }
        }
        i += 1;
    }
    (raw, &[])
}

/// Splits a multipart body into its parts by boundary delimiter lines.
///
/// The preamble before the first delimiter and the epilogue after the
/// closing `--boundary--` are discarded per RFC 2046.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delim = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut pos = 0;

    while pos <= body.len() {
        let line_start = pos;
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);

        let line = &body[line_start..line_end];
        let trimmed = trim_newlines(line);

        if trimmed.starts_with(delim) {
            if let Some(start) = current_start.take() {
                parts.push(trim_newlines(&body[start..line_start]));
            }
            let is_closing = trimmed[delim.len()..].starts_with(b"--");
            if is_closing {
                return parts;
            }
            current_start = Some(line_end);
        }

        if line_end == body.len() {
            break;
        }
        pos = line_end;
    }

    if let Some(start) = current_start {
        parts.push(trim_newlines(&body[start..]));
    }
    parts
}

fn trim_newlines(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b'\r' && b != b'\n')
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn strip_angle_brackets(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}
