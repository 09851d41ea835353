//! Durable sync-run records and checkpoints.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::model::{Checkpoint, SyncRun};
use super::Store;
use crate::error::Result;

fn run_from_row(row: &SqliteRow) -> Result<SyncRun> {
    Ok(SyncRun {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        sync_type: row.try_get("sync_type")?,
        status: row.try_get("status")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
        page_token: row.try_get("page_token")?,
        messages_processed: row.try_get("messages_processed")?,
        messages_added: row.try_get("messages_added")?,
        messages_updated: row.try_get("messages_updated")?,
        errors_count: row.try_get("errors_count")?,
        final_cursor: row.try_get("final_cursor")?,
    })
}

const RUN_COLUMNS: &str = "id, source_id, sync_type, status, started_at, finished_at, \
     error_message, page_token, messages_processed, messages_added, messages_updated, \
     errors_count, final_cursor";

impl Store {
    /// Creates a `running` sync-run record and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn start_sync(&self, source_id: i64, sync_type: &str) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO sync_runs (source_id, sync_type, status)
             VALUES (?, ?, 'running') RETURNING id",
        )
        .bind(source_id)
        .bind(sync_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Persists the resume point for a running sync. Called after each
    /// page so a crash resumes rather than restarts.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn update_sync_checkpoint(
        &self,
        sync_id: i64,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sync_runs SET
                 page_token = ?,
                 messages_processed = ?,
                 messages_added = ?,
                 messages_updated = ?,
                 errors_count = ?
             WHERE id = ?",
        )
        .bind(&checkpoint.page_token)
        .bind(checkpoint.messages_processed)
        .bind(checkpoint.messages_added)
        .bind(checkpoint.messages_updated)
        .bind(checkpoint.errors_count)
        .bind(sync_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a sync run completed, recording the final cursor.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn complete_sync(&self, sync_id: i64, final_cursor: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_runs SET
                 status = 'completed',
                 finished_at = CURRENT_TIMESTAMP,
                 final_cursor = ?
             WHERE id = ?",
        )
        .bind(final_cursor)
        .bind(sync_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a sync run failed with a reason.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn fail_sync(&self, sync_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_runs SET
                 status = 'failed',
                 finished_at = CURRENT_TIMESTAMP,
                 error_message = ?
             WHERE id = ?",
        )
        .bind(reason)
        .bind(sync_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the `running` sync run for a source, if any. At most one
    /// exists; a new sync either resumes it or refuses to start.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_active_sync(&self, source_id: i64) -> Result<Option<SyncRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs
             WHERE source_id = ? AND status = 'running'
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Returns the most recent completed sync run for a source.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_last_successful_sync(&self, source_id: i64) -> Result<Option<SyncRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs
             WHERE source_id = ? AND status = 'completed'
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_source() -> (Store, i64) {
        let store = Store::in_memory().await.unwrap();
        let source = store
            .get_or_create_source("gmail", "test@example.com")
            .await
            .unwrap();
        (store, source.id)
    }

    #[tokio::test]
    async fn test_start_and_get_active() {
        let (store, source_id) = store_with_source().await;

        assert!(store.get_active_sync(source_id).await.unwrap().is_none());

        let sync_id = store.start_sync(source_id, "full").await.unwrap();
        assert!(sync_id != 0);

        let active = store.get_active_sync(source_id).await.unwrap().unwrap();
        assert_eq!(active.id, sync_id);
        assert_eq!(active.status, "running");
        assert_eq!(active.sync_type, "full");
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let (store, source_id) = store_with_source().await;
        let sync_id = store.start_sync(source_id, "full").await.unwrap();

        let checkpoint = Checkpoint {
            page_token: "next-page-token".to_string(),
            messages_processed: 100,
            messages_added: 50,
            messages_updated: 10,
            errors_count: 2,
        };
        store
            .update_sync_checkpoint(sync_id, &checkpoint)
            .await
            .unwrap();

        let active = store.get_active_sync(source_id).await.unwrap().unwrap();
        assert_eq!(active.messages_processed, 100);
        assert_eq!(active.messages_added, 50);
        assert_eq!(active.page_token, "next-page-token");
        assert_eq!(active.errors_count, 2);
    }

    #[tokio::test]
    async fn test_complete_sync() {
        let (store, source_id) = store_with_source().await;
        let sync_id = store.start_sync(source_id, "full").await.unwrap();

        store.complete_sync(sync_id, "history-12345").await.unwrap();

        assert!(store.get_active_sync(source_id).await.unwrap().is_none());

        let last = store
            .get_last_successful_sync(source_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.status, "completed");
        assert_eq!(last.final_cursor.as_deref(), Some("history-12345"));
    }

    #[tokio::test]
    async fn test_fail_sync() {
        let (store, source_id) = store_with_source().await;
        let sync_id = store.start_sync(source_id, "full").await.unwrap();

        store.fail_sync(sync_id, "network error").await.unwrap();

        assert!(store.get_active_sync(source_id).await.unwrap().is_none());

        let (status, message): (String, String) =
            sqlx::query_as("SELECT status, error_message FROM sync_runs WHERE id = ?")
                .bind(sync_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(status, "failed");
        assert_eq!(message, "network error");
    }

    #[tokio::test]
    async fn test_no_successful_sync() {
        let (store, source_id) = store_with_source().await;
        assert!(store
            .get_last_successful_sync(source_id)
            .await
            .unwrap()
            .is_none());
    }
}
