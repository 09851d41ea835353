//! Row types for the relational store.

use chrono::{DateTime, Utc};

/// A remote account being archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Internal id.
    pub id: i64,
    /// Account kind, e.g. `"gmail"`.
    pub source_type: String,
    /// Unique identifier within the kind, e.g. the address.
    pub identifier: String,
    /// Last confirmed remote history point; `None` before the first
    /// completed full sync.
    pub sync_cursor: Option<String>,
}

/// Fields written by [`upsert_message`](crate::store::Store::upsert_message).
///
/// Keyed on `(source_id, source_message_id)`; a second upsert with the
/// same key updates in place and returns the same internal id.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// Owning conversation.
    pub conversation_id: i64,
    /// Owning source.
    pub source_id: i64,
    /// Remote message id, unique within the source.
    pub source_message_id: String,
    /// Message kind; `"email"` for everything this crate ingests.
    pub message_type: String,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Server-generated preview snippet.
    pub snippet: Option<String>,
    /// Best-known send time (Date header, falling back to
    /// [`internal_date`](Self::internal_date)).
    pub sent_at: Option<DateTime<Utc>>,
    /// Server receive timestamp.
    pub internal_date: Option<DateTime<Utc>>,
    /// Remote size estimate in bytes.
    pub size_estimate: i64,
    /// Whether any attachment rows exist for this message.
    pub has_attachments: bool,
    /// Number of attachments.
    pub attachment_count: i64,
}

/// A message row as read back from the store.
#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Internal id.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: i64,
    /// Owning source.
    pub source_id: i64,
    /// Remote message id.
    pub source_message_id: String,
    /// Decoded subject.
    pub subject: Option<String>,
    /// Preview snippet.
    pub snippet: Option<String>,
    /// Best-known send time.
    pub sent_at: Option<DateTime<Utc>>,
    /// Server receive timestamp.
    pub internal_date: Option<DateTime<Utc>>,
    /// Remote size estimate in bytes.
    pub size_estimate: i64,
    /// Whether attachments exist.
    pub has_attachments: bool,
    /// Soft-delete marker: when the remote reported the message gone.
    pub deleted_from_source_at: Option<DateTime<Utc>>,
    /// Whether the remote deletion was permanent.
    pub permanently_deleted: bool,
}

/// An attachment row.
#[derive(Debug, Clone)]
pub struct AttachmentRow {
    /// Internal id.
    pub id: i64,
    /// Owning message.
    pub message_id: i64,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// SHA-256 of the content, hex-encoded.
    pub content_hash: String,
    /// Content size in bytes.
    pub size_bytes: i64,
    /// Path of the content-addressed blob.
    pub blob_path: String,
}

/// A durable record of one sync attempt.
#[derive(Debug, Clone)]
pub struct SyncRun {
    /// Internal id.
    pub id: i64,
    /// Owning source.
    pub source_id: i64,
    /// `"full"` or `"incremental"`.
    pub sync_type: String,
    /// `"running"`, `"completed"`, or `"failed"`.
    pub status: String,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason for failed runs.
    pub error_message: Option<String>,
    /// Resume point: the next page token to fetch.
    pub page_token: String,
    /// Cumulative messages processed.
    pub messages_processed: i64,
    /// Cumulative messages added.
    pub messages_added: i64,
    /// Cumulative messages updated.
    pub messages_updated: i64,
    /// Cumulative per-message errors.
    pub errors_count: i64,
    /// History id recorded at completion.
    pub final_cursor: Option<String>,
}

/// The persisted resume point of a running sync.
///
/// Counters are cumulative and never decrease across restarts of the same
/// run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Next page token to fetch.
    pub page_token: String,
    /// Messages processed so far.
    pub messages_processed: i64,
    /// Messages added so far.
    pub messages_added: i64,
    /// Messages updated so far.
    pub messages_updated: i64,
    /// Per-message errors so far.
    pub errors_count: i64,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Live (non-deleted) messages.
    pub message_count: i64,
    /// Conversations.
    pub thread_count: i64,
    /// Participants.
    pub participant_count: i64,
    /// Attachment rows.
    pub attachment_count: i64,
    /// Sum of message size estimates in bytes.
    pub total_size_bytes: i64,
}
