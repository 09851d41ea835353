//! MIME content type handling.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx), keys lowercased.
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// Creates a text/plain content type with a utf-8 charset.
    #[must_use]
    pub fn text_plain() -> Self {
        let mut ct = Self::new("text", "plain");
        ct.parameters
            .insert("charset".to_string(), "utf-8".to_string());
        ct
    }

    /// Returns the full `type/subtype` string.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the name parameter if present (legacy attachment naming).
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`. Type,
    /// subtype, and parameter names are lowercased; parameter values keep
    /// their case with surrounding quotes stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` part is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');

        let type_str = parts
            .next()
            .ok_or_else(|| Error::InvalidContentType("Empty content type".to_string()))?
            .trim();

        let mut type_parts = type_str.split('/');
        let main_type = type_parts
            .next()
            .ok_or_else(|| Error::InvalidContentType("Missing main type".to_string()))?
            .trim()
            .to_lowercase();

        let sub_type = type_parts
            .next()
            .ok_or_else(|| Error::InvalidContentType("Missing subtype".to_string()))?
            .trim()
            .to_lowercase();

        let mut content_type = Self::new(main_type, sub_type);

        for param in parts {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=') {
                let key = key.trim().to_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                content_type.parameters.insert(key, value);
            }
        }

        Ok(content_type)
    }
}

/// Parsed Content-Disposition header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition kind, lowercased (e.g., "inline", "attachment").
    pub kind: String,
    /// The filename parameter, if present.
    pub filename: Option<String>,
}

impl Disposition {
    /// Parses a Content-Disposition value.
    ///
    /// Unlike [`ContentType::parse`] this never fails: a malformed value
    /// yields an empty disposition, which callers treat as "inline".
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split(';');
        let kind = parts.next().unwrap_or_default().trim().to_lowercase();

        let mut filename = None;
        for param in parts {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("filename") {
                    filename = Some(value.trim().trim_matches('"').to_string());
                }
            }
        }

        Self { kind, filename }
    }

    /// Checks if the disposition marks the part as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }
}
