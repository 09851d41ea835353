//! Incremental sync driven by the Gmail History API.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::store::Checkpoint;
use crate::sync::{Summary, Syncer};

impl Syncer {
    /// Runs an incremental sync from the source's saved history cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FullSyncRequired`] when the source has no cursor,
    /// and [`Error::HistoryExpired`] when the remote rejects the cursor
    /// with a 404 (the run is marked failed; the caller should fall back
    /// to a full sync). Cancellation checkpoints and leaves the run
    /// `running`.
    pub async fn incremental(&self, cancel: &CancellationToken, email: &str) -> Result<Summary> {
        let started = std::time::Instant::now();

        let source = self
            .store
            .get_source_by_identifier(email)
            .await?
            .ok_or_else(|| Error::SourceNotFound(email.to_string()))?;

        let start_history_id: u64 = source
            .sync_cursor
            .as_deref()
            .filter(|cursor| !cursor.is_empty())
            .ok_or_else(|| Error::FullSyncRequired(email.to_string()))?
            .parse()
            .map_err(|_| Error::FullSyncRequired(email.to_string()))?;

        let write_lock = self.store.source_write_lock(source.id);
        let _write_guard = write_lock.lock().await;

        let sync_id = self.store.start_sync(source.id, "incremental").await?;
        let mut summary = Summary::default();

        let profile = match self.client.get_profile(cancel).await {
            Ok(profile) => profile,
            Err(err) => {
                let _ = self.store.fail_sync(sync_id, &err.to_string()).await;
                return Err(err.into());
            }
        };

        info!(
            email,
            start_history = start_history_id,
            current_history = profile.history_id,
            "incremental sync"
        );

        // Nothing happened since the cursor.
        if start_history_id >= profile.history_id {
            let cursor = profile.history_id.to_string();
            self.store.complete_sync(sync_id, &cursor).await?;
            summary.duration = started.elapsed();
            summary.final_history_id = profile.history_id;
            return Ok(summary);
        }

        // New labels may have been created since the last sync.
        let label_map = match self.sync_labels(cancel, source.id).await {
            Ok(map) => map,
            Err(err) => {
                let _ = self.store.fail_sync(sync_id, &err.to_string()).await;
                return Err(err);
            }
        };

        let mut checkpoint = Checkpoint::default();
        match self
            .incremental_inner(
                cancel,
                source.id,
                sync_id,
                start_history_id,
                &label_map,
                &mut checkpoint,
                &mut summary,
            )
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                let _ = self.store.update_sync_checkpoint(sync_id, &checkpoint).await;
                return Err(err);
            }
            Err(Error::HistoryExpired) => {
                warn!(email, "history too old, full sync required");
                let _ = self.store.fail_sync(sync_id, "history too old").await;
                return Err(Error::HistoryExpired);
            }
            Err(err) => {
                let _ = self.store.fail_sync(sync_id, &err.to_string()).await;
                return Err(err);
            }
        }

        let cursor = profile.history_id.to_string();
        self.store
            .update_source_sync_cursor(source.id, &cursor)
            .await?;
        self.store.complete_sync(sync_id, &cursor).await?;

        summary.duration = started.elapsed();
        summary.messages_found = checkpoint.messages_processed;
        summary.messages_added = checkpoint.messages_added;
        summary.messages_updated = checkpoint.messages_updated;
        summary.errors = checkpoint.errors_count;
        summary.final_history_id = profile.history_id;

        self.progress.on_complete(&summary);
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn incremental_inner(
        &self,
        cancel: &CancellationToken,
        source_id: i64,
        sync_id: i64,
        start_history_id: u64,
        label_map: &HashMap<String, i64>,
        checkpoint: &mut Checkpoint,
        summary: &mut Summary,
    ) -> Result<()> {
        let attachments = self.attachment_store();
        let ingestor = Ingestor::new(&self.store, &attachments);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = match self
                .client
                .list_history(cancel, start_history_id, &checkpoint.page_token)
                .await
            {
                Ok(page) => page,
                // A 404 on history means the cursor is beyond the
                // retention window.
                Err(err) if err.is_not_found() => return Err(Error::HistoryExpired),
                Err(err) => return Err(err.into()),
            };

            for record in &page.history {
                for added in &record.messages_added {
                    let raw = match self.client.get_message_raw(cancel, &added.id).await {
                        Ok(raw) => raw,
                        Err(err) if err.is_not_found() => {
                            // Deleted again before we could fetch it.
                            continue;
                        }
                        Err(err) if err.is_cancelled() => return Err(err.into()),
                        Err(err) => {
                            warn!(id = %added.id, error = %err, "failed to fetch added message");
                            checkpoint.errors_count += 1;
                            continue;
                        }
                    };

                    match ingestor
                        .ingest(source_id, &raw, &added.thread_id, label_map)
                        .await
                    {
                        Ok(_) => {
                            checkpoint.messages_added += 1;
                            summary.bytes_downloaded += raw.raw.len() as i64;
                        }
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => {
                            warn!(id = %added.id, error = %err, "failed to ingest added message");
                            checkpoint.errors_count += 1;
                        }
                    }
                }

                for deleted in &record.messages_deleted {
                    if let Err(err) = self
                        .store
                        .mark_message_deleted(source_id, &deleted.id)
                        .await
                    {
                        warn!(id = %deleted.id, error = %err, "failed to mark message deleted");
                        checkpoint.errors_count += 1;
                    }
                }

                for change in &record.labels_added {
                    if let Err(err) = self
                        .handle_label_change(cancel, source_id, &change.message.id,
                            &change.message.thread_id, label_map, true, &ingestor)
                        .await
                    {
                        if err.is_cancelled() {
                            return Err(err);
                        }
                        warn!(id = %change.message.id, error = %err, "failed to handle label add");
                    }
                }

                for change in &record.labels_removed {
                    if let Err(err) = self
                        .handle_label_change(cancel, source_id, &change.message.id,
                            &change.message.thread_id, label_map, false, &ingestor)
                        .await
                    {
                        if err.is_cancelled() {
                            return Err(err);
                        }
                        warn!(id = %change.message.id, error = %err, "failed to handle label remove");
                    }
                }

                checkpoint.messages_processed += 1;
            }

            self.progress.on_progress(
                checkpoint.messages_processed,
                checkpoint.messages_added,
                0,
            );

            // Checkpoint per page; a crash resumes the history walk.
            checkpoint.page_token = page.next_page_token.clone();
            self.store.update_sync_checkpoint(sync_id, checkpoint).await?;

            if page.next_page_token.is_empty() {
                break;
            }
        }

        Ok(())
    }

    /// Applies a label change from history.
    ///
    /// Reconciliation refetch: rather than applying the delta, the
    /// message's full label set is refetched and replaced, which keeps
    /// the local state convergent even when history records arrive out of
    /// order. A message we do not hold yet is fetched and ingested when
    /// labels were added, and ignored when they were removed.
    async fn handle_label_change(
        &self,
        cancel: &CancellationToken,
        source_id: i64,
        message_id: &str,
        thread_id: &str,
        label_map: &HashMap<String, i64>,
        is_add: bool,
        ingestor: &Ingestor<'_>,
    ) -> Result<()> {
        let existing = self
            .store
            .message_exists_batch(source_id, &[message_id.to_string()])
            .await?;

        let Some(&internal_id) = existing.get(message_id) else {
            if is_add {
                let raw = self.client.get_message_raw(cancel, message_id).await?;
                ingestor.ingest(source_id, &raw, thread_id, label_map).await?;
            }
            // Removing labels from a message we never stored is a no-op.
            return Ok(());
        };

        let raw = self.client.get_message_raw(cancel, message_id).await?;
        let label_ids: Vec<i64> = raw
            .label_ids
            .iter()
            .filter_map(|remote| label_map.get(remote).copied())
            .collect();
        self.store
            .replace_message_labels(internal_id, &label_ids)
            .await
    }
}
