//! Gmail API surface: operation types and the client trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A Gmail user profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Account email address.
    pub email_address: String,
    /// Total messages in the mailbox.
    pub messages_total: i64,
    /// Total threads in the mailbox.
    pub threads_total: i64,
    /// Current history id; the incremental sync cursor target.
    pub history_id: u64,
}

/// A Gmail label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Label {
    /// Opaque label id (e.g. `INBOX`, `Label_12345`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// `"system"` or `"user"`.
    pub label_type: String,
}

/// A message reference from list or history operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRef {
    /// Message id.
    pub id: String,
    /// Thread id; may be empty in some list responses.
    pub thread_id: String,
}

/// One page of message references.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    /// Message references on this page.
    pub messages: Vec<MessageRef>,
    /// Token for the next page; empty when this is the last page.
    pub next_page_token: String,
    /// Server-side estimate of the total result size.
    pub result_size_estimate: i64,
}

/// A message with its raw RFC 822 payload.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// Message id.
    pub id: String,
    /// Thread id.
    pub thread_id: String,
    /// Label ids attached to the message.
    pub label_ids: Vec<String>,
    /// Server-generated snippet.
    pub snippet: String,
    /// History id at fetch time.
    pub history_id: u64,
    /// Server receive time in Unix milliseconds.
    pub internal_date: i64,
    /// Server size estimate in bytes.
    pub size_estimate: i64,
    /// Raw MIME bytes, decoded from base64url.
    pub raw: Vec<u8>,
}

/// One page of mailbox history.
#[derive(Debug, Clone, Default)]
pub struct HistoryList {
    /// History records on this page.
    pub history: Vec<HistoryRecord>,
    /// Token for the next page; empty when this is the last page.
    pub next_page_token: String,
    /// The history id this page brings the caller up to.
    pub history_id: u64,
}

/// A single history change record.
#[derive(Debug, Clone, Default)]
pub struct HistoryRecord {
    /// Record id.
    pub id: u64,
    /// Messages added to the mailbox.
    pub messages_added: Vec<MessageRef>,
    /// Messages removed from the mailbox.
    pub messages_deleted: Vec<MessageRef>,
    /// Label additions.
    pub labels_added: Vec<LabelChange>,
    /// Label removals.
    pub labels_removed: Vec<LabelChange>,
}

/// A label change on one message.
#[derive(Debug, Clone, Default)]
pub struct LabelChange {
    /// The affected message.
    pub message: MessageRef,
    /// The label ids added or removed.
    pub label_ids: Vec<String>,
}

/// Gmail operations used by sync and deletion.
///
/// Mocked in tests; the production implementation is
/// [`GmailClient`](crate::GmailClient).
#[async_trait]
pub trait GmailApi: Send + Sync {
    /// Returns the authenticated user's profile.
    async fn get_profile(&self, cancel: &CancellationToken) -> Result<Profile>;

    /// Returns all labels for the account.
    async fn list_labels(&self, cancel: &CancellationToken) -> Result<Vec<Label>>;

    /// Returns message ids matching `query`, one page at a time. Pass the
    /// previous response's `next_page_token` to continue; an empty token
    /// starts from the beginning.
    async fn list_messages(
        &self,
        cancel: &CancellationToken,
        query: &str,
        page_token: &str,
    ) -> Result<MessageList>;

    /// Fetches a single message with its raw MIME payload.
    async fn get_message_raw(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<RawMessage>;

    /// Fetches multiple messages concurrently under the rate limit.
    ///
    /// Results come back in input order; a failed fetch yields `None` in
    /// its slot rather than failing the batch.
    async fn get_messages_raw_batch(
        &self,
        cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<Vec<Option<RawMessage>>>;

    /// Returns mailbox changes since `start_history_id`.
    async fn list_history(
        &self,
        cancel: &CancellationToken,
        start_history_id: u64,
        page_token: &str,
    ) -> Result<HistoryList>;

    /// Moves a message to trash (recoverable for 30 days).
    async fn trash_message(&self, cancel: &CancellationToken, message_id: &str) -> Result<()>;

    /// Permanently deletes a message.
    async fn delete_message(&self, cancel: &CancellationToken, message_id: &str) -> Result<()>;

    /// Permanently deletes up to 1000 messages in one call.
    async fn batch_delete_messages(
        &self,
        cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<()>;
}
