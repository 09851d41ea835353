//! Sync coordinator: resumable full and incremental mailbox sync.

mod incremental;
#[cfg(test)]
pub(crate) mod testenv;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use msgvault_gmail::GmailApi;

use crate::attachments::AttachmentStore;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::store::{Checkpoint, Store};

/// Progress observer for a running sync.
///
/// All methods have no-op defaults, so [`NullProgress`] is just the unit
/// implementation.
pub trait SyncProgress: Send + Sync {
    /// Called when the sync begins, with the remote's total message count.
    fn on_start(&self, _total: i64) {}

    /// Called after each page with cumulative counters.
    fn on_progress(&self, _processed: i64, _added: i64, _skipped: i64) {}

    /// Called with the send date of the most recently ingested message,
    /// showing where in the mailbox the sync currently is.
    fn on_latest_date(&self, _date: DateTime<Utc>) {}

    /// Called once with the final summary.
    fn on_complete(&self, _summary: &Summary) {}
}

/// A progress observer that ignores everything.
pub struct NullProgress;

impl SyncProgress for NullProgress {}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Gmail search query restricting the full sync (e.g.
    /// `after:2024/01/01`). Empty syncs everything.
    pub query: String,
    /// Stop after processing this many messages, for partial archives.
    pub limit: Option<i64>,
    /// Ignore any running checkpoint and start over.
    pub no_resume: bool,
    /// Directory for content-addressed attachment blobs.
    pub attachments_dir: PathBuf,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: None,
            no_resume: false,
            attachments_dir: PathBuf::from("attachments"),
        }
    }
}

/// Statistics for a completed sync.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// Wall-clock duration of this invocation.
    pub duration: std::time::Duration,
    /// Message ids seen (full) or history records processed (incremental).
    pub messages_found: i64,
    /// Messages newly ingested.
    pub messages_added: i64,
    /// Messages updated in place.
    pub messages_updated: i64,
    /// Messages skipped because they already existed.
    pub messages_skipped: i64,
    /// Raw MIME bytes downloaded.
    pub bytes_downloaded: i64,
    /// Per-message errors (fetch failures, empty payloads).
    pub errors: i64,
    /// The history id recorded as the new sync cursor.
    pub final_history_id: u64,
    /// Whether this invocation resumed a checkpointed run.
    pub was_resumed: bool,
    /// The page token the run resumed from, when it did.
    pub resumed_from_token: String,
}

/// Drives full and incremental sync for one account.
pub struct Syncer {
    client: Arc<dyn GmailApi>,
    store: Arc<Store>,
    options: SyncOptions,
    progress: Arc<dyn SyncProgress>,
}

impl Syncer {
    /// Creates a syncer over the given client and store.
    #[must_use]
    pub fn new(client: Arc<dyn GmailApi>, store: Arc<Store>, options: SyncOptions) -> Self {
        Self {
            client,
            store,
            options,
            progress: Arc::new(NullProgress),
        }
    }

    /// Replaces the progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub(crate) fn attachment_store(&self) -> AttachmentStore {
        AttachmentStore::new(&self.options.attachments_dir)
    }

    /// Syncs labels from the remote, returning remote id to internal id.
    pub(crate) async fn sync_labels(
        &self,
        cancel: &CancellationToken,
        source_id: i64,
    ) -> Result<HashMap<String, i64>> {
        let labels = self.client.list_labels(cancel).await?;
        self.store.ensure_labels_batch(source_id, &labels).await
    }

    /// Runs a full sync: enumerate every remote message id, fetch the ones
    /// not yet stored, and ingest them. Resumable: the checkpoint persists
    /// after every page, and a run left `running` by a crash or
    /// cancellation is picked up where it stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when interrupted (the run stays
    /// `running` for resume) and other errors after marking the run
    /// failed.
    pub async fn full(&self, cancel: &CancellationToken, email: &str) -> Result<Summary> {
        let started = std::time::Instant::now();

        let source = self.store.get_or_create_source("gmail", email).await?;
        let write_lock = self.store.source_write_lock(source.id);
        let _write_guard = write_lock.lock().await;

        // Resume an interrupted run when there is one.
        let mut checkpoint = Checkpoint::default();
        let mut summary = Summary::default();
        let sync_id = match self.store.get_active_sync(source.id).await? {
            Some(run) if !self.options.no_resume => {
                checkpoint = Checkpoint {
                    page_token: run.page_token.clone(),
                    messages_processed: run.messages_processed,
                    messages_added: run.messages_added,
                    messages_updated: run.messages_updated,
                    errors_count: run.errors_count,
                };
                if !run.page_token.is_empty() {
                    summary.was_resumed = true;
                    summary.resumed_from_token = run.page_token.clone();
                    info!(email, token = %run.page_token, "resuming full sync from checkpoint");
                }
                run.id
            }
            Some(run) => {
                self.store
                    .fail_sync(run.id, "superseded by a no-resume run")
                    .await?;
                self.store.start_sync(source.id, "full").await?
            }
            None => self.store.start_sync(source.id, "full").await?,
        };

        match self
            .full_inner(cancel, source.id, sync_id, &mut checkpoint, &mut summary)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                // Leave the run `running`; the next invocation resumes it.
                let _ = self.store.update_sync_checkpoint(sync_id, &checkpoint).await;
                return Err(err);
            }
            Err(err) => {
                let _ = self.store.fail_sync(sync_id, &err.to_string()).await;
                return Err(err);
            }
        }

        summary.duration = started.elapsed();
        summary.messages_found = checkpoint.messages_processed;
        summary.messages_added = checkpoint.messages_added;
        summary.messages_updated = checkpoint.messages_updated;
        summary.errors = checkpoint.errors_count;

        self.progress.on_complete(&summary);
        info!(
            email,
            added = summary.messages_added,
            skipped = summary.messages_skipped,
            errors = summary.errors,
            "full sync complete"
        );
        Ok(summary)
    }

    async fn full_inner(
        &self,
        cancel: &CancellationToken,
        source_id: i64,
        sync_id: i64,
        checkpoint: &mut Checkpoint,
        summary: &mut Summary,
    ) -> Result<()> {
        let profile = self.client.get_profile(cancel).await?;
        let label_map = self.sync_labels(cancel, source_id).await?;
        let attachments = self.attachment_store();
        let ingestor = Ingestor::new(&self.store, &attachments);

        self.progress.on_start(profile.messages_total);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(limit) = self.options.limit {
                if checkpoint.messages_processed >= limit {
                    info!(limit, "message limit reached, stopping");
                    break;
                }
            }

            let page = self
                .client
                .list_messages(cancel, &self.options.query, &checkpoint.page_token)
                .await?;

            let ids: Vec<String> = page.messages.iter().map(|m| m.id.clone()).collect();
            let thread_hints: HashMap<&str, &str> = page
                .messages
                .iter()
                .map(|m| (m.id.as_str(), m.thread_id.as_str()))
                .collect();

            let existing = self.store.message_exists_batch(source_id, &ids).await?;
            let to_fetch: Vec<String> = ids
                .iter()
                .filter(|id| !existing.contains_key(*id))
                .cloned()
                .collect();

            checkpoint.messages_processed += ids.len() as i64;
            summary.messages_skipped += (ids.len() - to_fetch.len()) as i64;

            if !to_fetch.is_empty() {
                let raws = self
                    .client
                    .get_messages_raw_batch(cancel, &to_fetch)
                    .await?;

                for (id, raw) in to_fetch.iter().zip(raws) {
                    let Some(raw) = raw else {
                        warn!(id = %id, "failed to fetch message");
                        checkpoint.errors_count += 1;
                        continue;
                    };

                    let hint = thread_hints.get(id.as_str()).copied().unwrap_or_default();
                    match ingestor.ingest(source_id, &raw, hint, &label_map).await {
                        Ok(_) => {
                            checkpoint.messages_added += 1;
                            summary.bytes_downloaded += raw.raw.len() as i64;
                            if let Some(date) =
                                chrono::DateTime::from_timestamp_millis(raw.internal_date)
                            {
                                if raw.internal_date > 0 {
                                    self.progress.on_latest_date(date);
                                }
                            }
                        }
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => {
                            warn!(id = %id, error = %err, "failed to ingest message");
                            checkpoint.errors_count += 1;
                        }
                    }
                }
            }

            self.progress.on_progress(
                checkpoint.messages_processed,
                checkpoint.messages_added,
                summary.messages_skipped,
            );

            // Checkpoint after every page so a crash resumes here.
            checkpoint.page_token = page.next_page_token.clone();
            self.store.update_sync_checkpoint(sync_id, checkpoint).await?;

            if page.next_page_token.is_empty() {
                break;
            }
        }

        let cursor = profile.history_id.to_string();
        self.store
            .update_source_sync_cursor(source_id, &cursor)
            .await?;
        self.store.complete_sync(sync_id, &cursor).await?;
        summary.final_history_id = profile.history_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::testenv;
    use super::testenv::{TestEnv, TEST_MIME};
    use super::*;
    use msgvault_gmail::MockFailure;

    #[tokio::test]
    async fn test_full_sync_happy_path() {
        let env = TestEnv::new().await;
        env.seed_profile(3, 12345);
        env.mock.add_message("msg1", TEST_MIME, &["INBOX"]);
        env.mock.add_message("msg2", TEST_MIME, &["INBOX", "SENT"]);
        env.mock.add_message("msg3", TEST_MIME, &["SENT"]);

        let summary = env.run_full().await.unwrap();

        assert_eq!(summary.messages_added, 3);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.final_history_id, 12345);

        assert_eq!(env.mock.profile_calls(), 1);
        assert_eq!(env.mock.labels_calls(), 1);
        assert_eq!(env.mock.get_message_calls().len(), 3);

        let stats = env.store.get_stats().await.unwrap();
        assert_eq!(stats.message_count, 3);

        // All raw and body rows exist.
        let raw_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_raw")
            .fetch_one(env.store.pool())
            .await
            .unwrap();
        assert_eq!(raw_count, 3);
        let body_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_bodies")
            .fetch_one(env.store.pool())
            .await
            .unwrap();
        assert_eq!(body_count, 3);

        // The from edge resolves to the single sender participant.
        let senders: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT p.email_address FROM message_recipients mr
             JOIN participants p ON p.id = mr.participant_id
             WHERE mr.recipient_type = 'from'",
        )
        .fetch_all(env.store.pool())
        .await
        .unwrap();
        assert_eq!(senders, vec!["sender@example.com"]);

        // The cursor is recorded on the source.
        let source = env
            .store
            .get_source_by_identifier(testenv::TEST_EMAIL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.sync_cursor.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_full_sync_empty_inbox() {
        let env = TestEnv::new().await;
        env.seed_profile(0, 12345);

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 0);
        assert_eq!(summary.messages_found, 0);
    }

    #[tokio::test]
    async fn test_full_sync_profile_error() {
        let env = TestEnv::new().await;
        env.mock
            .fail_profile(MockFailure::Message("auth failed".to_string()));

        assert!(env.run_full().await.is_err());
    }

    #[tokio::test]
    async fn test_full_sync_skips_existing() {
        let env = TestEnv::new().await;
        env.seed_profile(3, 12345);
        for id in ["msg1", "msg2", "msg3"] {
            env.mock.add_message(id, TEST_MIME, &["INBOX"]);
        }

        env.run_full().await.unwrap();

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 0);
        assert_eq!(summary.messages_skipped, 3);
    }

    #[tokio::test]
    async fn test_full_sync_fetch_error_counted() {
        let env = TestEnv::new().await;
        env.seed_profile(3, 12345);
        for id in ["msg1", "msg2", "msg3"] {
            env.mock.add_message(id, TEST_MIME, &["INBOX"]);
        }
        env.mock.fail_get_message("msg2", MockFailure::NotFound);

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 2);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn test_full_sync_missing_listed_message() {
        let env = TestEnv::new().await;
        env.seed_profile(2, 12345);
        env.mock.add_message("msg-good", TEST_MIME, &["INBOX"]);
        // The list returns an id the get endpoint no longer has.
        env.mock
            .set_message_pages(vec![vec!["msg-good", "msg-missing"]]);

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 1);
    }

    #[tokio::test]
    async fn test_full_sync_mime_parse_error_stored_as_placeholder() {
        let env = TestEnv::new().await;
        env.seed_profile(2, 12345);
        env.mock.add_message("msg-good", TEST_MIME, &["INBOX"]);
        env.mock
            .add_message("msg-bad", b"not valid mime at all - just garbage", &["INBOX"]);

        let summary = env.run_full().await.unwrap();

        // Both stored; MIME failure is a warning, not an error.
        assert_eq!(summary.messages_added, 2);
        assert_eq!(summary.errors, 0);

        let body: String = sqlx::query_scalar(
            "SELECT mb.body_text FROM message_bodies mb
             JOIN messages m ON m.id = mb.message_id
             WHERE m.source_message_id = 'msg-bad'",
        )
        .fetch_one(env.store.pool())
        .await
        .unwrap();
        assert!(body.contains("MIME parsing failed"));

        let raw: Vec<u8> = sqlx::query_scalar(
            "SELECT mr.raw_data FROM message_raw mr
             JOIN messages m ON m.id = mr.message_id
             WHERE m.source_message_id = 'msg-bad'",
        )
        .fetch_one(env.store.pool())
        .await
        .unwrap();
        assert!(!raw.is_empty());
    }

    #[tokio::test]
    async fn test_full_sync_empty_raw_counted_as_error() {
        let env = TestEnv::new().await;
        env.seed_profile(2, 12345);
        env.mock.add_message("msg-good", TEST_MIME, &["INBOX"]);
        env.mock.add_raw_message(msgvault_gmail::RawMessage {
            id: "msg-empty-raw".to_string(),
            thread_id: "thread-empty-raw".to_string(),
            label_ids: vec!["INBOX".to_string()],
            ..msgvault_gmail::RawMessage::default()
        });

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 1);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn test_full_sync_resume_from_checkpoint() {
        let env = TestEnv::new().await;
        env.seed_profile(4, 12345);
        for id in ["msg1", "msg2", "msg3", "msg4"] {
            env.mock.add_message(id, TEST_MIME, &["INBOX"]);
        }

        // First: a sync that saw only page one.
        env.mock.set_message_pages(vec![vec!["msg1", "msg2"]]);
        env.run_full().await.unwrap();
        assert_eq!(env.store.get_stats().await.unwrap().message_count, 2);

        // Now both pages exist remotely and a run is checkpointed at page 1.
        env.mock
            .set_message_pages(vec![vec!["msg1", "msg2"], vec!["msg3", "msg4"]]);
        env.mock.reset_list_messages_calls();

        let source = env
            .store
            .get_source_by_identifier(testenv::TEST_EMAIL)
            .await
            .unwrap()
            .unwrap();
        let sync_id = env.store.start_sync(source.id, "full").await.unwrap();
        env.store
            .update_sync_checkpoint(
                sync_id,
                &Checkpoint {
                    page_token: "page_1".to_string(),
                    messages_processed: 2,
                    messages_added: 2,
                    ..Checkpoint::default()
                },
            )
            .await
            .unwrap();

        let summary = env.run_full().await.unwrap();

        assert!(summary.was_resumed);
        assert_eq!(summary.resumed_from_token, "page_1");
        // Cumulative: checkpointed plus newly ingested.
        assert_eq!(summary.messages_added, 4);
        // Only the second page was listed.
        assert_eq!(env.mock.list_messages_calls(), 1);
        assert_eq!(env.store.get_stats().await.unwrap().message_count, 4);
    }

    #[tokio::test]
    async fn test_full_sync_no_resume_supersedes_active_run() {
        let env = TestEnv::new().await;
        env.seed_profile(2, 12345);
        env.mock.add_message("msg1", TEST_MIME, &["INBOX"]);
        env.mock.add_message("msg2", TEST_MIME, &["INBOX"]);

        let source = env
            .store
            .get_or_create_source("gmail", testenv::TEST_EMAIL)
            .await
            .unwrap();
        let stale = env.store.start_sync(source.id, "full").await.unwrap();
        env.store
            .update_sync_checkpoint(
                stale,
                &Checkpoint {
                    page_token: "page_9".to_string(),
                    ..Checkpoint::default()
                },
            )
            .await
            .unwrap();

        let mut options = SyncOptions::default();
        options.no_resume = true;
        options.attachments_dir = env.attachments_dir();
        let syncer = Syncer::new(env.mock.clone(), env.store.clone(), options);

        let summary = syncer
            .full(&CancellationToken::new(), testenv::TEST_EMAIL)
            .await
            .unwrap();

        assert!(!summary.was_resumed);
        assert_eq!(summary.messages_added, 2);

        let status: String = sqlx::query_scalar("SELECT status FROM sync_runs WHERE id = ?")
            .bind(stale)
            .fetch_one(env.store.pool())
            .await
            .unwrap();
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn test_full_sync_cancelled_leaves_run_running() {
        let env = TestEnv::new().await;
        env.seed_profile(2, 12345);
        env.mock.add_message("msg1", TEST_MIME, &["INBOX"]);
        env.mock.add_message("msg2", TEST_MIME, &["INBOX"]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = env.syncer().full(&cancel, testenv::TEST_EMAIL).await.unwrap_err();
        assert!(err.is_cancelled());

        let source = env
            .store
            .get_source_by_identifier(testenv::TEST_EMAIL)
            .await
            .unwrap()
            .unwrap();
        let active = env.store.get_active_sync(source.id).await.unwrap();
        assert!(active.is_some(), "cancelled run should stay running for resume");
    }

    #[tokio::test]
    async fn test_full_sync_with_limit() {
        let env = TestEnv::new().await;
        env.seed_profile(4, 12345);
        for id in ["msg1", "msg2", "msg3", "msg4"] {
            env.mock.add_message(id, TEST_MIME, &["INBOX"]);
        }
        env.mock
            .set_message_pages(vec![vec!["msg1", "msg2"], vec!["msg3", "msg4"]]);

        let mut options = SyncOptions::default();
        options.limit = Some(2);
        options.attachments_dir = env.attachments_dir();
        let syncer = Syncer::new(env.mock.clone(), env.store.clone(), options);

        let summary = syncer
            .full(&CancellationToken::new(), testenv::TEST_EMAIL)
            .await
            .unwrap();
        assert_eq!(summary.messages_added, 2);
        assert_eq!(env.store.get_stats().await.unwrap().message_count, 2);
    }

    #[tokio::test]
    async fn test_full_sync_message_without_subject() {
        let env = TestEnv::new().await;
        env.seed_profile(1, 12345);
        env.mock.add_message(
            "msg-nosubj",
            b"From: sender@example.com\r\nTo: recipient@example.com\r\n\r\nBody only.\r\n",
            &["INBOX"],
        );

        let summary = env.run_full().await.unwrap();
        assert_eq!(summary.messages_added, 1);

        let subject: Option<String> = sqlx::query_scalar(
            "SELECT subject FROM messages WHERE source_message_id = 'msg-nosubj'",
        )
        .fetch_one(env.store.pool())
        .await
        .unwrap();
        assert_eq!(subject, None);
    }
}
