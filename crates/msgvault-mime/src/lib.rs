//! # msgvault-mime
//!
//! MIME message parsing for msgvault.
//!
//! This crate turns raw RFC 822 bytes into a normalized [`Message`]:
//! address lists (including RFC 2822 group recovery), decoded subject and
//! bodies with charset conversion, Date parsing across the formats seen in
//! real mailboxes, HTML-to-text extraction, and attachment separation.
//!
//! Parsing is deliberately lenient: field-level problems accumulate in
//! [`Message::errors`], and [`parse_lenient`] substitutes a placeholder
//! body on structural failure so ingestion can always persist the message
//! alongside its raw bytes.
//!
//! ```ignore
//! let msg = msgvault_mime::parse_lenient(raw_bytes);
//! println!("subject: {}", msg.subject);
//! for addr in &msg.from {
//!     println!("from: {} <{}>", addr.name, addr.email);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod charset;
mod content_type;
mod date;
mod error;
mod header;
mod html;
mod message;

pub mod encoding;

pub use address::{Address, extract_domain, parse_address_list};
pub use charset::decode_charset;
pub use content_type::{ContentType, Disposition};
pub use date::{parse_date, parse_references};
pub use error::{Error, Result};
pub use header::Headers;
pub use html::strip_html;
pub use message::{AttachmentPart, Message, parse, parse_lenient};
