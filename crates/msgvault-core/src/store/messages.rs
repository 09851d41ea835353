//! Message graph persistence: messages, bodies, raw MIME, recipients,
//! labels, attachments.

use std::collections::HashMap;

use sqlx::Row;

use super::model::{NewMessage, Stats};
use super::{queries, Store};
use crate::error::Result;

impl Store {
    /// Inserts or updates a message keyed on `(source_id,
    /// source_message_id)`, returning its internal id.
    ///
    /// Updates rewrite content fields only; the soft-delete markers are
    /// left untouched so a re-sync never resurrects a deleted row.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn upsert_message(&self, message: &NewMessage) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        queries::upsert_message(&mut conn, message).await
    }

    /// Writes or replaces the 1-to-1 body row for a message and refreshes
    /// the FTS index entry when available.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn upsert_message_body(
        &self,
        message_id: i64,
        body_text: &str,
        body_html: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        queries::upsert_message_body(&mut tx, message_id, body_text, body_html).await?;

        if self.search_full_text() {
            let subject: Option<String> =
                sqlx::query_scalar("SELECT subject FROM messages WHERE id = ?")
                    .bind(message_id)
                    .fetch_one(&mut *tx)
                    .await?;
            queries::upsert_fts(&mut tx, message_id, &subject.unwrap_or_default(), body_text)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Compresses and writes (or replaces) the raw MIME bytes for a
    /// message.
    ///
    /// # Errors
    ///
    /// Returns an error on compression or database failure.
    pub async fn upsert_message_raw(&self, message_id: i64, raw: &[u8]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        queries::upsert_message_raw(&mut conn, message_id, raw).await
    }

    /// Reads and decompresses the raw MIME bytes for a message.
    ///
    /// # Errors
    ///
    /// Returns an error if no raw row exists or decompression fails.
    pub async fn get_message_raw(&self, message_id: i64) -> Result<Vec<u8>> {
        let row = sqlx::query(
            "SELECT raw_data, compression FROM message_raw WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        let data: Vec<u8> = row.try_get("raw_data")?;
        let compression: String = row.try_get("compression")?;
        Ok(queries::decompress(&data, &compression)?)
    }

    /// Records an attachment row. A duplicate `(message_id, content_hash)`
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn upsert_attachment(
        &self,
        message_id: i64,
        filename: &str,
        mime_type: &str,
        blob_path: &str,
        content_hash: &str,
        size_bytes: i64,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        queries::upsert_attachment(
            &mut conn,
            message_id,
            filename,
            mime_type,
            blob_path,
            content_hash,
            size_bytes,
        )
        .await
    }

    /// Replaces the label set on a message. An empty slice removes all
    /// labels.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn replace_message_labels(&self, message_id: i64, label_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        queries::replace_message_labels(&mut tx, message_id, label_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces the recipient edges of one type on a message. Entries are
    /// `(participant_id, display_name)`; duplicates by participant
    /// collapse, preferring a non-empty display name. An empty slice
    /// removes all edges of that type.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn replace_message_recipients(
        &self,
        message_id: i64,
        recipient_type: &str,
        recipients: &[(i64, String)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        queries::replace_message_recipients(&mut tx, message_id, recipient_type, recipients)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns which of the given remote ids already exist for the source,
    /// mapped to their internal ids.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn message_exists_batch(
        &self,
        source_id: i64,
        source_message_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        if source_message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; source_message_ids.len()].join(", ");
        let sql = format!(
            "SELECT source_message_id, id FROM messages
             WHERE source_id = ? AND source_message_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(source_id);
        for id in source_message_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut existing = HashMap::with_capacity(rows.len());
        for row in rows {
            existing.insert(row.try_get("source_message_id")?, row.try_get("id")?);
        }
        Ok(existing)
    }

    /// Marks a message as deleted from its source. Missing rows are a
    /// no-op; an already-set marker is never rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn mark_message_deleted(
        &self,
        source_id: i64,
        source_message_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET
                 deleted_from_source_at = COALESCE(deleted_from_source_at, datetime('now')),
                 updated_at = CURRENT_TIMESTAMP
             WHERE source_id = ? AND source_message_id = ?",
        )
        .bind(source_id)
        .bind(source_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a message deleted by its remote id alone (used by the
    /// deletion engine, which works from manifests of remote ids).
    /// Missing rows are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn mark_message_deleted_by_remote_id(
        &self,
        permanent: bool,
        remote_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET
                 deleted_from_source_at = COALESCE(deleted_from_source_at, datetime('now')),
                 permanently_deleted = CASE WHEN ? THEN 1 ELSE permanently_deleted END,
                 updated_at = CURRENT_TIMESTAMP
             WHERE source_message_id = ?",
        )
        .bind(permanent)
        .bind(remote_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counts live (non-deleted) messages for a source.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn count_messages_for_source(&self, source_id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages
             WHERE source_id = ? AND deleted_from_source_at IS NULL",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Counts live messages that have a raw MIME row.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn count_messages_with_raw(&self, source_id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             JOIN message_raw mr ON mr.message_id = m.id
             WHERE m.source_id = ? AND m.deleted_from_source_at IS NULL",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Samples up to `count` live message ids uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_random_message_ids(&self, source_id: i64, count: i64) -> Result<Vec<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM messages
             WHERE source_id = ? AND deleted_from_source_at IS NULL
             ORDER BY RANDOM() LIMIT ?",
        )
        .bind(source_id)
        .bind(count)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Returns aggregate counts over the store.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM messages WHERE deleted_from_source_at IS NULL)
                     AS message_count,
                 (SELECT COUNT(*) FROM conversations) AS thread_count,
                 (SELECT COUNT(*) FROM participants) AS participant_count,
                 (SELECT COUNT(*) FROM attachments) AS attachment_count,
                 (SELECT COALESCE(SUM(size_estimate), 0) FROM messages
                  WHERE deleted_from_source_at IS NULL) AS total_size_bytes",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            message_count: row.try_get("message_count")?,
            thread_count: row.try_get("thread_count")?,
            participant_count: row.try_get("participant_count")?,
            attachment_count: row.try_get("attachment_count")?,
            total_size_bytes: row.try_get("total_size_bytes")?,
        })
    }
}
