//! Idempotent execution of deletion manifests against the remote.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use msgvault_gmail::GmailApi;

use super::{Execution, Manager, Manifest, ManifestStatus};
use crate::error::{Error, Result};
use crate::store::Store;

/// The Gmail batchDelete endpoint accepts at most this many ids per call.
const BATCH_DELETE_LIMIT: usize = 1000;

/// How a manifest's messages are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Move to trash (recoverable for 30 days).
    Trash,
    /// Permanent deletion.
    Delete,
}

/// Options for [`Executor::execute`].
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Deletion method.
    pub method: Method,
    /// Checkpoint the manifest every this many messages.
    pub batch_size: usize,
    /// Continue an `in_progress` manifest from its last processed index.
    pub resume: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            method: Method::Trash,
            batch_size: 100,
            resume: true,
        }
    }
}

/// Progress observer for deletion runs. All methods default to no-ops.
pub trait DeletionProgress: Send + Sync {
    /// Called with the manifest's total id count.
    fn on_start(&self, _total: usize) {}

    /// Called at each checkpoint with cumulative counters.
    fn on_progress(&self, _processed: usize, _succeeded: i64, _failed: i64) {}

    /// Called once with the final counters.
    fn on_complete(&self, _succeeded: i64, _failed: i64) {}
}

/// A progress observer that ignores everything.
pub struct NullProgress;

impl DeletionProgress for NullProgress {}

/// Executes deletion manifests.
pub struct Executor {
    manager: Arc<Manager>,
    store: Arc<Store>,
    client: Arc<dyn GmailApi>,
    progress: Arc<dyn DeletionProgress>,
}

impl Executor {
    /// Creates an executor over the given manifest manager, store, and
    /// API client.
    #[must_use]
    pub fn new(manager: Arc<Manager>, store: Arc<Store>, client: Arc<dyn GmailApi>) -> Self {
        Self {
            manager,
            store,
            client,
            progress: Arc::new(NullProgress),
        }
    }

    /// Replaces the progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn DeletionProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Executes a manifest id by id.
    ///
    /// A remote 404 counts as success: the message is already gone, which
    /// is the goal, and this is what makes re-running a partially
    /// executed manifest idempotent. The manifest checkpoints every
    /// `batch_size` messages; cancellation checkpoints and returns
    /// without a status transition so the run can resume.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest is missing or in a
    /// non-executable status, or [`Error::Cancelled`] on interruption.
    /// Per-message failures are recorded on the manifest, not returned.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        manifest_id: &str,
        options: Option<ExecuteOptions>,
    ) -> Result<()> {
        let options = options.unwrap_or_default();
        let batch_size = options.batch_size.max(1);
        let mut manifest = self.manager.get_manifest(manifest_id)?;

        let mut execution = match manifest.status {
            ManifestStatus::Pending => {
                self.manager.move_manifest(
                    manifest_id,
                    ManifestStatus::Pending,
                    ManifestStatus::InProgress,
                )?;
                manifest.status = ManifestStatus::InProgress;
                Execution::start(options.method)
            }
            ManifestStatus::InProgress if options.resume => manifest
                .execution
                .clone()
                .unwrap_or_else(|| Execution::start(options.method)),
            status => {
                return Err(Error::InvalidManifestStatus {
                    id: manifest_id.to_string(),
                    expected: "pending or resumable in_progress".to_string(),
                    actual: status.to_string(),
                });
            }
        };

        let method = execution.method;
        let start_index = execution.last_processed_index;
        let total = manifest.remote_ids.len();

        self.progress.on_start(total);
        info!(
            id = manifest_id,
            total,
            start_index,
            ?method,
            "executing deletion manifest"
        );

        let ids = manifest.remote_ids.clone();
        for (index, remote_id) in ids.iter().enumerate().skip(start_index) {
            if cancel.is_cancelled() {
                self.checkpoint(&mut manifest, &mut execution, index)?;
                return Err(Error::Cancelled);
            }

            let result = match method {
                Method::Trash => self.client.trash_message(cancel, remote_id).await,
                Method::Delete => self.client.delete_message(cancel, remote_id).await,
            };

            match result {
                Ok(()) => {
                    execution.succeeded += 1;
                    self.mark_deleted_locally(method, remote_id).await;
                }
                // Already gone remotely; the work is done.
                Err(err) if err.is_not_found() => {
                    execution.succeeded += 1;
                    self.mark_deleted_locally(method, remote_id).await;
                }
                Err(err) if err.is_cancelled() => {
                    self.checkpoint(&mut manifest, &mut execution, index)?;
                    return Err(Error::Cancelled);
                }
                Err(err) => {
                    warn!(id = %remote_id, error = %err, "deletion failed");
                    execution.failed += 1;
                    execution.failed_ids.push(remote_id.clone());
                }
            }

            let processed = index + 1;
            if processed % batch_size == 0 {
                self.checkpoint(&mut manifest, &mut execution, processed)?;
                self.progress
                    .on_progress(processed, execution.succeeded, execution.failed);
            }
        }

        self.finish(&mut manifest, execution, total)
    }

    /// Executes a pending manifest with the remote batch endpoint.
    ///
    /// Ids are split into chunks of at most 1000. A chunk whose batch
    /// call fails falls back to individual deletes for that chunk only,
    /// where 404 still counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest is not `pending`, or
    /// [`Error::Cancelled`] on interruption.
    pub async fn execute_batch(
        &self,
        cancel: &CancellationToken,
        manifest_id: &str,
    ) -> Result<()> {
        let mut manifest = self.manager.get_manifest(manifest_id)?;
        if manifest.status != ManifestStatus::Pending {
            return Err(Error::InvalidManifestStatus {
                id: manifest_id.to_string(),
                expected: ManifestStatus::Pending.to_string(),
                actual: manifest.status.to_string(),
            });
        }

        self.manager.move_manifest(
            manifest_id,
            ManifestStatus::Pending,
            ManifestStatus::InProgress,
        )?;
        manifest.status = ManifestStatus::InProgress;
        let mut execution = Execution::start(Method::Delete);

        let ids = manifest.remote_ids.clone();
        let total = ids.len();
        self.progress.on_start(total);

        let mut processed = 0;
        for chunk in ids.chunks(BATCH_DELETE_LIMIT) {
            if cancel.is_cancelled() {
                self.checkpoint(&mut manifest, &mut execution, processed)?;
                return Err(Error::Cancelled);
            }

            match self.client.batch_delete_messages(cancel, chunk).await {
                Ok(()) => {
                    execution.succeeded += chunk.len() as i64;
                    for remote_id in chunk {
                        self.mark_deleted_locally(Method::Delete, remote_id).await;
                    }
                }
                Err(err) if err.is_cancelled() => {
                    self.checkpoint(&mut manifest, &mut execution, processed)?;
                    return Err(Error::Cancelled);
                }
                Err(err) => {
                    // Batch failed as a whole: retry this chunk one id at
                    // a time so one bad id cannot sink the rest.
                    warn!(error = %err, chunk = chunk.len(), "batch delete failed, falling back");
                    self.fallback_chunk(cancel, &mut execution, chunk).await?;
                }
            }

            processed += chunk.len();
            self.checkpoint(&mut manifest, &mut execution, processed)?;
            self.progress
                .on_progress(processed, execution.succeeded, execution.failed);
        }

        self.finish(&mut manifest, execution, total)
    }

    async fn fallback_chunk(
        &self,
        cancel: &CancellationToken,
        execution: &mut Execution,
        chunk: &[String],
    ) -> Result<()> {
        for remote_id in chunk {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.client.delete_message(cancel, remote_id).await {
                Ok(()) => {
                    execution.succeeded += 1;
                    self.mark_deleted_locally(Method::Delete, remote_id).await;
                }
                Err(err) if err.is_not_found() => {
                    execution.succeeded += 1;
                    self.mark_deleted_locally(Method::Delete, remote_id).await;
                }
                Err(err) if err.is_cancelled() => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(id = %remote_id, error = %err, "fallback delete failed");
                    execution.failed += 1;
                    execution.failed_ids.push(remote_id.clone());
                }
            }
        }
        Ok(())
    }

    /// Mirrors a confirmed remote deletion into the local store. Local
    /// bookkeeping failure must not fail the remote run.
    async fn mark_deleted_locally(&self, method: Method, remote_id: &str) {
        let permanent = method == Method::Delete;
        if let Err(err) = self
            .store
            .mark_message_deleted_by_remote_id(permanent, remote_id)
            .await
        {
            warn!(id = %remote_id, error = %err, "failed to mark local message deleted");
        }
    }

    /// Persists the execution state onto the manifest in place. The
    /// processed index is monotone: a resume can never move it backwards.
    fn checkpoint(
        &self,
        manifest: &mut Manifest,
        execution: &mut Execution,
        processed: usize,
    ) -> Result<()> {
        execution.last_processed_index = execution.last_processed_index.max(processed);
        manifest.execution = Some(execution.clone());
        self.manager.save_manifest(manifest)
    }

    fn finish(&self, manifest: &mut Manifest, mut execution: Execution, total: usize) -> Result<()> {
        self.checkpoint(manifest, &mut execution, total)?;

        let (succeeded, failed) = (execution.succeeded, execution.failed);
        let target = if succeeded > 0 {
            ManifestStatus::Completed
        } else {
            ManifestStatus::Failed
        };

        self.manager
            .move_manifest(&manifest.id, ManifestStatus::InProgress, target)?;
        manifest.status = target;
        self.manager.save_manifest(manifest)?;

        self.progress.on_complete(succeeded, failed);
        info!(
            id = %manifest.id,
            succeeded,
            failed,
            status = %target,
            "deletion manifest finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Filters;
    use super::*;
    use chrono::Utc;
    use msgvault_gmail::{MockApi, MockFailure};
    use std::sync::Mutex;

    struct TrackingProgress {
        state: Mutex<TrackingState>,
    }

    #[derive(Default)]
    struct TrackingState {
        start_total: usize,
        completed: bool,
        final_succeeded: i64,
        final_failed: i64,
    }

    impl TrackingProgress {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(TrackingState::default()),
            })
        }

        fn result(&self) -> (i64, i64) {
            let state = self.state.lock().unwrap();
            (state.final_succeeded, state.final_failed)
        }

        fn completed(&self) -> bool {
            self.state.lock().unwrap().completed
        }

        fn start_total(&self) -> usize {
            self.state.lock().unwrap().start_total
        }
    }

    impl DeletionProgress for TrackingProgress {
        fn on_start(&self, total: usize) {
            self.state.lock().unwrap().start_total = total;
        }

        fn on_complete(&self, succeeded: i64, failed: i64) {
            let mut state = self.state.lock().unwrap();
            state.completed = true;
            state.final_succeeded = succeeded;
            state.final_failed = failed;
        }
    }

    struct TestContext {
        manager: Arc<Manager>,
        mock: Arc<MockApi>,
        executor: Executor,
        progress: Arc<TrackingProgress>,
        store: Arc<Store>,
        _dir: tempfile::TempDir,
    }

    impl TestContext {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let manager = Arc::new(Manager::new(dir.path()).unwrap());
            let store = Arc::new(Store::in_memory().await.unwrap());
            let mock = Arc::new(MockApi::new());
            let progress = TrackingProgress::new();
            let executor = Executor::new(manager.clone(), store.clone(), mock.clone())
                .with_progress(progress.clone());
            Self {
                manager,
                mock,
                executor,
                progress,
                store,
                _dir: dir,
            }
        }

        fn create_manifest(&self, name: &str, ids: &[&str]) -> Manifest {
            self.manager
                .create_manifest(
                    name,
                    ids.iter().map(ToString::to_string).collect(),
                    Filters::default(),
                )
                .unwrap()
        }

        async fn execute(&self, id: &str) -> Result<()> {
            self.executor
                .execute(&CancellationToken::new(), id, None)
                .await
        }

        async fn execute_batch(&self, id: &str) -> Result<()> {
            self.executor
                .execute_batch(&CancellationToken::new(), id)
                .await
        }

        fn assert_counts(&self, succeeded: i64, failed: i64) {
            assert_eq!(self.progress.result(), (succeeded, failed));
        }

        fn count_in(&self, status: ManifestStatus) -> usize {
            self.manager.list(status).unwrap().len()
        }
    }

    #[test]
    fn test_default_options() {
        let options = ExecuteOptions::default();
        assert_eq!(options.method, Method::Trash);
        assert_eq!(options.batch_size, 100);
        assert!(options.resume);
    }

    #[test]
    fn test_null_progress_noop() {
        let progress = NullProgress;
        progress.on_start(10);
        progress.on_progress(5, 4, 1);
        progress.on_complete(9, 1);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("test deletion", &["msg1", "msg2", "msg3"]);

        ctx.execute(&manifest.id).await.unwrap();

        assert_eq!(ctx.mock.trash_calls().len(), 3);
        assert!(ctx.progress.completed());
        assert_eq!(ctx.progress.start_total(), 3);
        ctx.assert_counts(3, 0);
        assert_eq!(ctx.count_in(ManifestStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_execute_with_delete_method() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("permanent delete", &["msg1", "msg2"]);

        let options = ExecuteOptions {
            method: Method::Delete,
            ..ExecuteOptions::default()
        };
        ctx.executor
            .execute(&CancellationToken::new(), &manifest.id, Some(options))
            .await
            .unwrap();

        assert_eq!(ctx.mock.delete_calls().len(), 2);
        assert!(ctx.mock.trash_calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_partial_failure() {
        let ctx = TestContext::new().await;
        ctx.mock
            .fail_trash("msg2", MockFailure::Message("trash failed".to_string()));
        let manifest = ctx.create_manifest("partial failure", &["msg1", "msg2", "msg3"]);

        ctx.execute(&manifest.id).await.unwrap();

        ctx.assert_counts(2, 1);
        assert_eq!(ctx.count_in(ManifestStatus::Completed), 1);

        let loaded = ctx.manager.get_manifest(&manifest.id).unwrap();
        let execution = loaded.execution.unwrap();
        assert_eq!(execution.failed_ids, vec!["msg2"]);
    }

    #[tokio::test]
    async fn test_execute_all_fail_goes_to_failed() {
        let ctx = TestContext::new().await;
        ctx.mock
            .fail_trash("msg1", MockFailure::Message("fail 1".to_string()));
        ctx.mock
            .fail_trash("msg2", MockFailure::Message("fail 2".to_string()));
        let manifest = ctx.create_manifest("total failure", &["msg1", "msg2"]);

        ctx.execute(&manifest.id).await.unwrap();
        assert_eq!(ctx.count_in(ManifestStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_execute_not_found_counts_as_success() {
        let ctx = TestContext::new().await;
        ctx.mock.fail_trash("msg2", MockFailure::NotFound);
        let manifest = ctx.create_manifest("idempotent", &["msg1", "msg2", "msg3"]);

        ctx.execute(&manifest.id).await.unwrap();

        ctx.assert_counts(3, 0);
        assert_eq!(ctx.count_in(ManifestStatus::Completed), 1);

        let loaded = ctx.manager.get_manifest(&manifest.id).unwrap();
        assert!(loaded.execution.unwrap().failed_ids.is_empty());
    }

    #[tokio::test]
    async fn test_execute_delete_method_404() {
        let ctx = TestContext::new().await;
        ctx.mock.fail_delete("msg2", MockFailure::NotFound);
        let manifest = ctx.create_manifest("delete 404", &["msg1", "msg2", "msg3"]);

        let options = ExecuteOptions {
            method: Method::Delete,
            ..ExecuteOptions::default()
        };
        ctx.executor
            .execute(&CancellationToken::new(), &manifest.id, Some(options))
            .await
            .unwrap();

        ctx.assert_counts(3, 0);
    }

    #[tokio::test]
    async fn test_execute_cancelled_stays_in_progress() {
        let ctx = TestContext::new().await;
        let ids: Vec<String> = (0..100).map(|i| format!("msg{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let manifest = ctx.create_manifest("interrupt", &id_refs);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx
            .executor
            .execute(&cancel, &manifest.id, None)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        assert_eq!(ctx.count_in(ManifestStatus::InProgress), 1);
    }

    #[tokio::test]
    async fn test_execute_small_batch_size() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("small batches", &["m1", "m2", "m3", "m4", "m5"]);

        let options = ExecuteOptions {
            batch_size: 2,
            ..ExecuteOptions::default()
        };
        ctx.executor
            .execute(&CancellationToken::new(), &manifest.id, Some(options))
            .await
            .unwrap();

        assert_eq!(ctx.mock.trash_calls().len(), 5);
        ctx.assert_counts(5, 0);
    }

    #[tokio::test]
    async fn test_execute_manifest_not_found() {
        let ctx = TestContext::new().await;
        assert!(ctx.execute("nonexistent-id").await.is_err());
    }

    #[tokio::test]
    async fn test_execute_completed_manifest_rejected() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("done", &["msg1"]);

        ctx.execute(&manifest.id).await.unwrap();

        let err = ctx.execute(&manifest.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidManifestStatus { .. }));
    }

    #[tokio::test]
    async fn test_execute_resume_from_in_progress() {
        let ctx = TestContext::new().await;

        // A manifest interrupted after msg1 and msg2.
        let mut manifest = Manifest::new(
            "resume",
            ["msg1", "msg2", "msg3", "msg4", "msg5"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );
        manifest.status = ManifestStatus::InProgress;
        manifest.execution = Some(Execution {
            method: Method::Trash,
            started_at: Utc::now(),
            succeeded: 2,
            failed: 0,
            last_processed_index: 2,
            failed_ids: Vec::new(),
        });
        ctx.manager.save_manifest(&manifest).unwrap();

        ctx.execute(&manifest.id).await.unwrap();

        // Only the remaining three were attempted.
        assert_eq!(ctx.mock.trash_calls(), vec!["msg3", "msg4", "msg5"]);

        let loaded = ctx.manager.get_manifest(&manifest.id).unwrap();
        assert_eq!(loaded.execution.unwrap().succeeded, 5);
        assert_eq!(loaded.status, ManifestStatus::Completed);
    }

    #[tokio::test]
    async fn test_execute_marks_local_store() {
        let ctx = TestContext::new().await;

        let source = ctx
            .store
            .get_or_create_source("gmail", "test@example.com")
            .await
            .unwrap();
        let conv = ctx
            .store
            .ensure_conversation(source.id, "t1", "T")
            .await
            .unwrap();
        ctx.store
            .upsert_message(&crate::store::NewMessage {
                conversation_id: conv,
                source_id: source.id,
                source_message_id: "msg1".to_string(),
                message_type: "email".to_string(),
                ..crate::store::NewMessage::default()
            })
            .await
            .unwrap();

        let manifest = ctx.create_manifest("local mark", &["msg1"]);
        ctx.execute(&manifest.id).await.unwrap();

        let deleted: Option<String> = sqlx::query_scalar(
            "SELECT deleted_from_source_at FROM messages WHERE source_message_id = 'msg1'",
        )
        .fetch_one(ctx.store.pool())
        .await
        .unwrap();
        assert!(deleted.is_some());
    }

    #[tokio::test]
    async fn test_execute_batch_success() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("batch", &["msg1", "msg2", "msg3"]);

        ctx.execute_batch(&manifest.id).await.unwrap();

        let calls = ctx.mock.batch_delete_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 3);
        assert!(ctx.progress.completed());
        ctx.assert_counts(3, 0);
        assert_eq!(ctx.count_in(ManifestStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_execute_batch_splits_large_manifests() {
        let ctx = TestContext::new().await;
        let ids: Vec<String> = (0..1500).map(|i| format!("msg{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let manifest = ctx.create_manifest("large batch", &id_refs);

        ctx.execute_batch(&manifest.id).await.unwrap();

        let calls = ctx.mock.batch_delete_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 1000);
        assert_eq!(calls[1].len(), 500);
        ctx.assert_counts(1500, 0);
    }

    #[tokio::test]
    async fn test_execute_batch_fallback_on_error() {
        let ctx = TestContext::new().await;
        ctx.mock
            .fail_batch_delete(MockFailure::Message("batch failed".to_string()));
        let manifest = ctx.create_manifest("fallback", &["msg1", "msg2", "msg3"]);

        ctx.execute_batch(&manifest.id).await.unwrap();

        assert_eq!(ctx.mock.batch_delete_calls().len(), 1);
        assert_eq!(ctx.mock.delete_calls().len(), 3);
        ctx.assert_counts(3, 0);
    }

    #[tokio::test]
    async fn test_execute_batch_fallback_404_counts_as_success() {
        let ctx = TestContext::new().await;
        ctx.mock
            .fail_batch_delete(MockFailure::Message("batch failed".to_string()));
        ctx.mock.fail_delete("msg2", MockFailure::NotFound);
        let manifest = ctx.create_manifest("fallback 404", &["msg1", "msg2", "msg3"]);

        ctx.execute_batch(&manifest.id).await.unwrap();
        ctx.assert_counts(3, 0);
    }

    #[tokio::test]
    async fn test_execute_batch_fallback_mixed_failures() {
        let ctx = TestContext::new().await;
        ctx.mock
            .fail_batch_delete(MockFailure::Message("batch not supported".to_string()));
        ctx.mock.fail_delete("msg2", MockFailure::NotFound);
        ctx.mock
            .fail_delete("msg3", MockFailure::Message("permission denied".to_string()));
        let manifest = ctx.create_manifest("fallback mixed", &["msg1", "msg2", "msg3", "msg4"]);

        ctx.execute_batch(&manifest.id).await.unwrap();

        ctx.assert_counts(3, 1);
        assert_eq!(ctx.mock.batch_delete_calls().len(), 1);
        assert_eq!(ctx.mock.delete_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_execute_batch_requires_pending() {
        let ctx = TestContext::new().await;
        let manifest = ctx.create_manifest("wrong status", &["msg1"]);
        ctx.manager
            .move_manifest(&manifest.id, ManifestStatus::Pending, ManifestStatus::InProgress)
            .unwrap();

        let err = ctx.execute_batch(&manifest.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidManifestStatus { .. }));
    }

    #[tokio::test]
    async fn test_execute_batch_cancelled() {
        let ctx = TestContext::new().await;
        let ids: Vec<String> = (0..2500).map(|i| format!("msg{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let manifest = ctx.create_manifest("cancel batch", &id_refs);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx
            .executor
            .execute_batch(&cancel, &manifest.id)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_batch_manifest_not_found() {
        let ctx = TestContext::new().await;
        assert!(ctx.execute_batch("nonexistent-id").await.is_err());
    }

    #[tokio::test]
    async fn test_rerun_after_remote_deletion_idempotent() {
        // Re-running a manifest where the remote already removed some ids
        // yields the same final succeeded count.
        let ctx = TestContext::new().await;

        let mut manifest = Manifest::new(
            "idempotent rerun",
            ["msg1", "msg2", "msg3"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        );
        manifest.status = ManifestStatus::InProgress;
        manifest.execution = Some(Execution {
            method: Method::Trash,
            started_at: Utc::now(),
            succeeded: 1,
            failed: 0,
            last_processed_index: 1,
            failed_ids: Vec::new(),
        });
        ctx.manager.save_manifest(&manifest).unwrap();

        // msg2 was trashed out-of-band; the remote now 404s it.
        ctx.mock.fail_trash("msg2", MockFailure::NotFound);

        ctx.execute(&manifest.id).await.unwrap();

        let loaded = ctx.manager.get_manifest(&manifest.id).unwrap();
        assert_eq!(loaded.execution.unwrap().succeeded, 3);
        assert_eq!(loaded.status, ManifestStatus::Completed);
    }
}
