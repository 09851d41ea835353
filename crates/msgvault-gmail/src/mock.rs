//! Scripted in-memory [`GmailApi`] implementation for tests.
//!
//! Sync and deletion tests drive this instead of the network: messages,
//! pagination, history records, and per-operation failures are all
//! injectable, and every call is recorded for assertions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::{
    GmailApi, HistoryList, HistoryRecord, Label, MessageList, MessageRef, Profile, RawMessage,
};
use crate::error::{Error, Result};

/// An injectable failure for a mock operation.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Respond with a 404.
    NotFound,
    /// Respond with an opaque API error.
    Message(String),
}

impl MockFailure {
    fn to_error(&self, path: &str) -> Error {
        match self {
            Self::NotFound => Error::not_found(path),
            Self::Message(msg) => Error::Api {
                status: 500,
                message: msg.clone(),
            },
        }
    }
}

#[derive(Default)]
struct MockState {
    profile: Profile,
    profile_failure: Option<MockFailure>,
    labels_failure: Option<MockFailure>,
    extra_labels: Vec<String>,

    message_order: Vec<String>,
    messages: HashMap<String, RawMessage>,
    message_pages: Option<Vec<Vec<String>>>,
    list_thread_override: HashMap<String, String>,
    get_message_failures: HashMap<String, MockFailure>,

    history_records: Vec<HistoryRecord>,
    history_id: u64,
    history_failure: Option<MockFailure>,

    trash_failures: HashMap<String, MockFailure>,
    delete_failures: HashMap<String, MockFailure>,
    batch_delete_failure: Option<MockFailure>,

    profile_calls: usize,
    labels_calls: usize,
    list_messages_calls: usize,
    get_message_calls: Vec<String>,
    trash_calls: Vec<String>,
    delete_calls: Vec<String>,
    batch_delete_calls: Vec<Vec<String>>,
}

/// Scripted Gmail API double.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all scripted state and recorded calls.
    pub fn reset(&self) {
        *self.lock() = MockState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock mutex poisoned")
    }

    /// Sets the profile returned by `get_profile`.
    pub fn set_profile(&self, profile: Profile) {
        self.lock().profile = profile;
    }

    /// Updates only the profile's history id.
    pub fn set_profile_history_id(&self, history_id: u64) {
        self.lock().profile.history_id = history_id;
    }

    /// Makes `get_profile` fail.
    pub fn fail_profile(&self, failure: MockFailure) {
        self.lock().profile_failure = Some(failure);
    }

    /// Makes `list_labels` fail.
    pub fn fail_labels(&self, failure: MockFailure) {
        self.lock().labels_failure = Some(failure);
    }

    /// Registers an extra label id beyond those carried by messages.
    pub fn add_label(&self, label_id: impl Into<String>) {
        self.lock().extra_labels.push(label_id.into());
    }

    /// Registers a message with raw MIME bytes and label ids. The thread
    /// id defaults to `thread_<id>`.
    pub fn add_message(&self, id: &str, raw: &[u8], label_ids: &[&str]) {
        let message = RawMessage {
            id: id.to_string(),
            thread_id: format!("thread_{id}"),
            label_ids: label_ids.iter().map(ToString::to_string).collect(),
            size_estimate: raw.len() as i64,
            raw: raw.to_vec(),
            ..RawMessage::default()
        };
        self.add_raw_message(message);
    }

    /// Registers a fully specified message.
    pub fn add_raw_message(&self, message: RawMessage) {
        let mut state = self.lock();
        if !state.messages.contains_key(&message.id) {
            state.message_order.push(message.id.clone());
        }
        state.messages.insert(message.id.clone(), message);
    }

    /// Replaces the label ids on a registered message.
    pub fn set_message_labels(&self, id: &str, label_ids: &[&str]) {
        if let Some(message) = self.lock().messages.get_mut(id) {
            message.label_ids = label_ids.iter().map(ToString::to_string).collect();
        }
    }

    /// Scripts explicit pagination: each inner vec is one page of ids.
    pub fn set_message_pages(&self, pages: Vec<Vec<&str>>) {
        self.lock().message_pages = Some(
            pages
                .into_iter()
                .map(|page| page.into_iter().map(ToString::to_string).collect())
                .collect(),
        );
    }

    /// Overrides the thread id reported by `list_messages` for one id
    /// (empty string models list responses without a thread id).
    pub fn override_list_thread_id(&self, id: &str, thread_id: &str) {
        self.lock()
            .list_thread_override
            .insert(id.to_string(), thread_id.to_string());
    }

    /// Makes `get_message_raw` fail for one id.
    pub fn fail_get_message(&self, id: &str, failure: MockFailure) {
        self.lock()
            .get_message_failures
            .insert(id.to_string(), failure);
    }

    /// Scripts the history response.
    pub fn set_history(&self, records: Vec<HistoryRecord>, history_id: u64) {
        let mut state = self.lock();
        state.history_records = records;
        state.history_id = history_id;
    }

    /// Makes `list_history` fail.
    pub fn fail_history(&self, failure: MockFailure) {
        self.lock().history_failure = Some(failure);
    }

    /// Makes `trash_message` fail for one id.
    pub fn fail_trash(&self, id: &str, failure: MockFailure) {
        self.lock().trash_failures.insert(id.to_string(), failure);
    }

    /// Makes `delete_message` fail for one id.
    pub fn fail_delete(&self, id: &str, failure: MockFailure) {
        self.lock().delete_failures.insert(id.to_string(), failure);
    }

    /// Makes every `batch_delete_messages` call fail.
    pub fn fail_batch_delete(&self, failure: MockFailure) {
        self.lock().batch_delete_failure = Some(failure);
    }

    /// Number of `get_profile` calls.
    #[must_use]
    pub fn profile_calls(&self) -> usize {
        self.lock().profile_calls
    }

    /// Number of `list_labels` calls.
    #[must_use]
    pub fn labels_calls(&self) -> usize {
        self.lock().labels_calls
    }

    /// Number of `list_messages` calls.
    #[must_use]
    pub fn list_messages_calls(&self) -> usize {
        self.lock().list_messages_calls
    }

    /// Resets only the `list_messages` call counter.
    pub fn reset_list_messages_calls(&self) {
        self.lock().list_messages_calls = 0;
    }

    /// Ids passed to `get_message_raw`, in order.
    #[must_use]
    pub fn get_message_calls(&self) -> Vec<String> {
        self.lock().get_message_calls.clone()
    }

    /// Ids passed to `trash_message`, in order.
    #[must_use]
    pub fn trash_calls(&self) -> Vec<String> {
        self.lock().trash_calls.clone()
    }

    /// Ids passed to `delete_message`, in order.
    #[must_use]
    pub fn delete_calls(&self) -> Vec<String> {
        self.lock().delete_calls.clone()
    }

    /// Id batches passed to `batch_delete_messages`, in order.
    #[must_use]
    pub fn batch_delete_calls(&self) -> Vec<Vec<String>> {
        self.lock().batch_delete_calls.clone()
    }
}

/// Guesses a label type from its id shape: Gmail system labels are
/// all-caps (`INBOX`, `STARRED`), user labels are `Label_<n>`.
fn label_type_for(id: &str) -> &'static str {
    if id.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        "system"
    } else {
        "user"
    }
}

#[async_trait]
impl GmailApi for MockApi {
    async fn get_profile(&self, _cancel: &CancellationToken) -> Result<Profile> {
        let mut state = self.lock();
        state.profile_calls += 1;
        if let Some(failure) = &state.profile_failure {
            return Err(failure.to_error("/profile"));
        }
        Ok(state.profile.clone())
    }

    async fn list_labels(&self, _cancel: &CancellationToken) -> Result<Vec<Label>> {
        let mut state = self.lock();
        state.labels_calls += 1;
        if let Some(failure) = &state.labels_failure {
            return Err(failure.to_error("/labels"));
        }

        let mut seen = Vec::new();
        for id in &state.extra_labels {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        for id in &state.message_order {
            if let Some(message) = state.messages.get(id) {
                for label in &message.label_ids {
                    if !seen.contains(label) {
                        seen.push(label.clone());
                    }
                }
            }
        }

        Ok(seen
            .into_iter()
            .map(|id| Label {
                label_type: label_type_for(&id).to_string(),
                name: id.clone(),
                id,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        _cancel: &CancellationToken,
        _query: &str,
        page_token: &str,
    ) -> Result<MessageList> {
        let mut state = self.lock();
        state.list_messages_calls += 1;

        let pages: Vec<Vec<String>> = state
            .message_pages
            .clone()
            .unwrap_or_else(|| vec![state.message_order.clone()]);

        let page_index = if page_token.is_empty() {
            0
        } else {
            page_token
                .strip_prefix("page_")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::InvalidResponse(format!("bad page token {page_token}")))?
        };

        let Some(ids) = pages.get(page_index) else {
            return Ok(MessageList::default());
        };

        let messages = ids
            .iter()
            .map(|id| {
                let thread_id = state
                    .list_thread_override
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| {
                        state
                            .messages
                            .get(id)
                            .map(|m| m.thread_id.clone())
                            .unwrap_or_default()
                    });
                MessageRef {
                    id: id.clone(),
                    thread_id,
                }
            })
            .collect();

        let next_page_token = if page_index + 1 < pages.len() {
            format!("page_{}", page_index + 1)
        } else {
            String::new()
        };

        Ok(MessageList {
            messages,
            next_page_token,
            result_size_estimate: state.profile.messages_total,
        })
    }

    async fn get_message_raw(
        &self,
        _cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<RawMessage> {
        let mut state = self.lock();
        state.get_message_calls.push(message_id.to_string());

        if let Some(failure) = state.get_message_failures.get(message_id) {
            return Err(failure.to_error(&format!("/messages/{message_id}")));
        }
        state
            .messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("/messages/{message_id}")))
    }

    async fn get_messages_raw_batch(
        &self,
        cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<Vec<Option<RawMessage>>> {
        let mut results = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            results.push(self.get_message_raw(cancel, id).await.ok());
        }
        Ok(results)
    }

    async fn list_history(
        &self,
        _cancel: &CancellationToken,
        _start_history_id: u64,
        _page_token: &str,
    ) -> Result<HistoryList> {
        let state = self.lock();
        if let Some(failure) = &state.history_failure {
            return Err(failure.to_error("/history"));
        }
        Ok(HistoryList {
            history: state.history_records.clone(),
            next_page_token: String::new(),
            history_id: state.history_id,
        })
    }

    async fn trash_message(&self, _cancel: &CancellationToken, message_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.trash_calls.push(message_id.to_string());
        if let Some(failure) = state.trash_failures.get(message_id) {
            return Err(failure.to_error(&format!("/messages/{message_id}/trash")));
        }
        Ok(())
    }

    async fn delete_message(&self, _cancel: &CancellationToken, message_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.delete_calls.push(message_id.to_string());
        if let Some(failure) = state.delete_failures.get(message_id) {
            return Err(failure.to_error(&format!("/messages/{message_id}")));
        }
        Ok(())
    }

    async fn batch_delete_messages(
        &self,
        _cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<()> {
        let mut state = self.lock();
        state.batch_delete_calls.push(message_ids.to_vec());
        if let Some(failure) = &state.batch_delete_failure {
            return Err(failure.to_error("/messages/batchDelete"));
        }
        Ok(())
    }
}
