//! Read-side query facade consumed by the CLI and other frontends.
//!
//! All methods are read-only SQL over the store's pool; writers are never
//! blocked. Full-text search uses the FTS index when the store has one
//! and degrades to metadata LIKE matching when it does not.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::Result;
use crate::search::Query;
use crate::store::{AttachmentRow, Store};

/// One message in a result list.
#[derive(Debug, Clone)]
pub struct MessageSummary {
    /// Internal id.
    pub id: i64,
    /// Remote message id.
    pub source_message_id: String,
    /// Subject, if any.
    pub subject: Option<String>,
    /// Preview snippet.
    pub snippet: Option<String>,
    /// Sender address, empty when the message had none.
    pub from_email: String,
    /// Sender display name.
    pub from_name: String,
    /// Best-known send time.
    pub sent_at: Option<DateTime<Utc>>,
    /// Size estimate in bytes.
    pub size_estimate: i64,
    /// Whether attachments exist.
    pub has_attachments: bool,
    /// Whether the remote reported the message deleted.
    pub deleted: bool,
}

/// A full message with bodies and labels.
#[derive(Debug, Clone)]
pub struct MessageDetail {
    /// The list-level fields.
    pub summary: MessageSummary,
    /// Plain text body.
    pub body_text: Option<String>,
    /// HTML body.
    pub body_html: Option<String>,
    /// Label names on the message.
    pub labels: Vec<String>,
}

/// A label row exposed to frontends.
#[derive(Debug, Clone)]
pub struct LabelInfo {
    /// Internal id.
    pub id: i64,
    /// Remote label id.
    pub source_label_id: String,
    /// Display name.
    pub name: String,
    /// `"system"` or `"user"`.
    pub label_type: String,
}

/// Exact and empty-bucket filters for [`QueryEngine::list_messages`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to one account identifier.
    pub account: Option<String>,
    /// Exact sender address.
    pub sender: Option<String>,
    /// Exact sender domain.
    pub domain: Option<String>,
    /// Label name.
    pub label: Option<String>,
    /// Restrict to one conversation.
    pub conversation_id: Option<i64>,
    /// Messages with no sender edge at all.
    pub match_empty_sender: bool,
    /// Messages with no to/cc/bcc edges.
    pub match_empty_recipient: bool,
    /// Messages with no labels.
    pub match_empty_label: bool,
    /// Messages whose sender has an empty domain.
    pub match_empty_domain: bool,
    /// Maximum rows returned.
    pub limit: i64,
    /// Rows to skip.
    pub offset: i64,
}

/// Aggregation dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// By sender address.
    Sender,
    /// By recipient address; counts both `to` and `cc` edges.
    Recipient,
    /// By sender domain.
    Domain,
    /// By label name.
    Label,
    /// By time bucket.
    Time(TimeGranularity),
}

/// Time bucket width for [`GroupBy::Time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeGranularity {
    /// Calendar year.
    Year,
    /// Calendar month.
    Month,
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    /// Bucket key: address, domain, label, or time bucket.
    pub key: String,
    /// Message count in the bucket.
    pub count: i64,
    /// Sum of message size estimates.
    pub total_size: i64,
}

enum Param {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [Param],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value),
            Param::Int(value) => query.bind(value),
            Param::Time(value) => query.bind(value),
        };
    }
    query
}

const SUMMARY_SELECT: &str = "SELECT m.id, m.source_message_id, m.subject, m.snippet,
        m.sent_at, m.size_estimate, m.has_attachments,
        m.deleted_from_source_at IS NOT NULL AS deleted,
        COALESCE((
            SELECT p.email_address FROM message_recipients mr
            JOIN participants p ON p.id = mr.participant_id
            WHERE mr.message_id = m.id AND mr.recipient_type = 'from'
            LIMIT 1
        ), '') AS from_email,
        COALESCE((
            SELECT mr.display_name FROM message_recipients mr
            WHERE mr.message_id = m.id AND mr.recipient_type = 'from'
            LIMIT 1
        ), '') AS from_name
    FROM messages m";

fn summary_from_row(row: &SqliteRow) -> Result<MessageSummary> {
    Ok(MessageSummary {
        id: row.try_get("id")?,
        source_message_id: row.try_get("source_message_id")?,
        subject: row.try_get("subject")?,
        snippet: row.try_get("snippet")?,
        from_email: row.try_get("from_email")?,
        from_name: row.try_get("from_name")?,
        sent_at: row.try_get("sent_at")?,
        size_estimate: row.try_get("size_estimate")?,
        has_attachments: row.try_get("has_attachments")?,
        deleted: row.try_get("deleted")?,
    })
}

/// Read-side facade over the store.
pub struct QueryEngine {
    store: Arc<Store>,
}

impl QueryEngine {
    /// Creates a facade over the given store.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Runs a parsed search query.
    ///
    /// Text terms use the FTS index when available and a LIKE fallback
    /// over subject, body, and participant addresses when it is not.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn search(
        &self,
        query: &Query,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageSummary>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Param> = Vec::new();

        if !query.text_terms.is_empty() {
            if self.store.search_full_text() {
                conditions.push(
                    "m.id IN (SELECT message_id FROM messages_fts WHERE messages_fts MATCH ?)"
                        .to_string(),
                );
                let match_expr = query
                    .text_terms
                    .iter()
                    .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
                    .collect::<Vec<_>>()
                    .join(" ");
                params.push(Param::Text(match_expr));
            } else {
                // Metadata fallback: every term must appear somewhere.
                for term in &query.text_terms {
                    conditions.push(
                        "(m.subject LIKE ? ESCAPE '\\'
                          OR EXISTS (SELECT 1 FROM message_bodies mb
                                     WHERE mb.message_id = m.id AND mb.body_text LIKE ? ESCAPE '\\')
                          OR EXISTS (SELECT 1 FROM message_recipients mr
                                     JOIN participants p ON p.id = mr.participant_id
                                     WHERE mr.message_id = m.id AND p.email_address LIKE ? ESCAPE '\\'))"
                            .to_string(),
                    );
                    let pattern = format!("%{}%", escape_like(term));
                    params.push(Param::Text(pattern.clone()));
                    params.push(Param::Text(pattern.clone()));
                    params.push(Param::Text(pattern));
                }
            }
        }

        for (addrs, recipient_type) in [
            (&query.from_addrs, "from"),
            (&query.to_addrs, "to"),
            (&query.cc_addrs, "cc"),
            (&query.bcc_addrs, "bcc"),
        ] {
            for addr in addrs {
                conditions.push(format!(
                    "EXISTS (SELECT 1 FROM message_recipients mr
                             JOIN participants p ON p.id = mr.participant_id
                             WHERE mr.message_id = m.id AND mr.recipient_type = '{recipient_type}'
                               AND p.email_address LIKE ? ESCAPE '\\')"
                ));
                params.push(Param::Text(format!("%{}%", escape_like(addr))));
            }
        }

        for term in &query.subject_terms {
            conditions.push("m.subject LIKE ? ESCAPE '\\'".to_string());
            params.push(Param::Text(format!("%{}%", escape_like(term))));
        }

        for label in &query.labels {
            conditions.push(
                "EXISTS (SELECT 1 FROM message_labels ml
                         JOIN labels l ON l.id = ml.label_id
                         WHERE ml.message_id = m.id
                           AND (l.name = ? COLLATE NOCASE OR l.source_label_id = ? COLLATE NOCASE))"
                    .to_string(),
            );
            params.push(Param::Text(label.clone()));
            params.push(Param::Text(label.clone()));
        }

        if query.has_attachment == Some(true) {
            conditions.push("m.has_attachments = 1".to_string());
        }
        if let Some(before) = query.before_date {
            conditions.push("m.sent_at < ?".to_string());
            params.push(Param::Time(before));
        }
        if let Some(after) = query.after_date {
            conditions.push("m.sent_at >= ?".to_string());
            params.push(Param::Time(after));
        }
        if let Some(larger) = query.larger_than {
            conditions.push("m.size_estimate > ?".to_string());
            params.push(Param::Int(larger));
        }
        if let Some(smaller) = query.smaller_than {
            conditions.push("m.size_estimate < ?".to_string());
            params.push(Param::Int(smaller));
        }
        if let Some(account) = &query.account {
            conditions.push(
                "m.source_id = (SELECT id FROM sources WHERE identifier = ?)".to_string(),
            );
            params.push(Param::Text(account.clone()));
        }

        let mut sql = SUMMARY_SELECT.to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY m.sent_at DESC, m.id DESC LIMIT ? OFFSET ?");
        params.push(Param::Int(limit));
        params.push(Param::Int(offset));

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    /// Lists messages by exact and empty-bucket filters.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_messages(&self, filter: &ListFilter) -> Result<Vec<MessageSummary>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Param> = Vec::new();

        if let Some(account) = &filter.account {
            conditions.push(
                "m.source_id = (SELECT id FROM sources WHERE identifier = ?)".to_string(),
            );
            params.push(Param::Text(account.clone()));
        }
        if let Some(sender) = &filter.sender {
            conditions.push(
                "EXISTS (SELECT 1 FROM message_recipients mr
                         JOIN participants p ON p.id = mr.participant_id
                         WHERE mr.message_id = m.id AND mr.recipient_type = 'from'
                           AND p.email_address = ?)"
                    .to_string(),
            );
            params.push(Param::Text(sender.to_lowercase()));
        }
        if let Some(domain) = &filter.domain {
            conditions.push(
                "EXISTS (SELECT 1 FROM message_recipients mr
                         JOIN participants p ON p.id = mr.participant_id
                         WHERE mr.message_id = m.id AND mr.recipient_type = 'from'
                           AND p.domain = ?)"
                    .to_string(),
            );
            params.push(Param::Text(domain.to_lowercase()));
        }
        if let Some(label) = &filter.label {
            conditions.push(
                "EXISTS (SELECT 1 FROM message_labels ml
                         JOIN labels l ON l.id = ml.label_id
                         WHERE ml.message_id = m.id AND l.name = ? COLLATE NOCASE)"
                    .to_string(),
            );
            params.push(Param::Text(label.clone()));
        }
        if let Some(conversation_id) = filter.conversation_id {
            conditions.push("m.conversation_id = ?".to_string());
            params.push(Param::Int(conversation_id));
        }

        if filter.match_empty_sender {
            conditions.push(
                "NOT EXISTS (SELECT 1 FROM message_recipients mr
                             WHERE mr.message_id = m.id AND mr.recipient_type = 'from')"
                    .to_string(),
            );
        }
        if filter.match_empty_recipient {
            conditions.push(
                "NOT EXISTS (SELECT 1 FROM message_recipients mr
                             WHERE mr.message_id = m.id
                               AND mr.recipient_type IN ('to', 'cc', 'bcc'))"
                    .to_string(),
            );
        }
        if filter.match_empty_label {
            conditions.push(
                "NOT EXISTS (SELECT 1 FROM message_labels ml WHERE ml.message_id = m.id)"
                    .to_string(),
            );
        }
        if filter.match_empty_domain {
            conditions.push(
                "EXISTS (SELECT 1 FROM message_recipients mr
                         JOIN participants p ON p.id = mr.participant_id
                         WHERE mr.message_id = m.id AND mr.recipient_type = 'from'
                           AND p.domain = '')"
                    .to_string(),
            );
        }

        let mut sql = SUMMARY_SELECT.to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY m.sent_at DESC, m.id DESC");
        if filter.limit > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Param::Int(filter.limit));
            params.push(Param::Int(filter.offset));
        }

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    /// Aggregates live messages along one dimension.
    ///
    /// Recipient aggregation counts both `to` and `cc` edges; a message
    /// cc'd to someone counts toward that address.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn aggregate(&self, group_by: GroupBy) -> Result<Vec<AggregateRow>> {
        let sql = match group_by {
            GroupBy::Sender => {
                "SELECT p.email_address AS key,
                        COUNT(DISTINCT m.id) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 JOIN message_recipients mr ON mr.message_id = m.id AND mr.recipient_type = 'from'
                 JOIN participants p ON p.id = mr.participant_id
                 WHERE m.deleted_from_source_at IS NULL
                 GROUP BY p.email_address
                 ORDER BY count DESC, key"
            }
            GroupBy::Recipient => {
                "SELECT p.email_address AS key,
                        COUNT(DISTINCT m.id) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 JOIN message_recipients mr ON mr.message_id = m.id
                      AND mr.recipient_type IN ('to', 'cc')
                 JOIN participants p ON p.id = mr.participant_id
                 WHERE m.deleted_from_source_at IS NULL
                 GROUP BY p.email_address
                 ORDER BY count DESC, key"
            }
            GroupBy::Domain => {
                "SELECT p.domain AS key,
                        COUNT(DISTINCT m.id) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 JOIN message_recipients mr ON mr.message_id = m.id AND mr.recipient_type = 'from'
                 JOIN participants p ON p.id = mr.participant_id
                 WHERE m.deleted_from_source_at IS NULL
                 GROUP BY p.domain
                 ORDER BY count DESC, key"
            }
            GroupBy::Label => {
                "SELECT l.name AS key,
                        COUNT(DISTINCT m.id) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 JOIN message_labels ml ON ml.message_id = m.id
                 JOIN labels l ON l.id = ml.label_id
                 WHERE m.deleted_from_source_at IS NULL
                 GROUP BY l.name
                 ORDER BY count DESC, key"
            }
            GroupBy::Time(TimeGranularity::Year) => {
                "SELECT strftime('%Y', m.sent_at) AS key,
                        COUNT(*) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 WHERE m.deleted_from_source_at IS NULL AND m.sent_at IS NOT NULL
                 GROUP BY key
                 ORDER BY key"
            }
            GroupBy::Time(TimeGranularity::Month) => {
                "SELECT strftime('%Y-%m', m.sent_at) AS key,
                        COUNT(*) AS count,
                        COALESCE(SUM(m.size_estimate), 0) AS total_size
                 FROM messages m
                 WHERE m.deleted_from_source_at IS NULL AND m.sent_at IS NOT NULL
                 GROUP BY key
                 ORDER BY key"
            }
        };

        let rows = sqlx::query(sql).fetch_all(self.store.pool()).await?;
        rows.iter()
            .map(|row| {
                Ok(AggregateRow {
                    key: row.try_get::<Option<String>, _>("key")?.unwrap_or_default(),
                    count: row.try_get("count")?,
                    total_size: row.try_get("total_size")?,
                })
            })
            .collect()
    }

    /// Fetches one message with bodies and labels.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_message(&self, message_id: i64) -> Result<Option<MessageDetail>> {
        let sql = format!("{SUMMARY_SELECT} WHERE m.id = ?");
        let Some(row) = sqlx::query(&sql)
            .bind(message_id)
            .fetch_optional(self.store.pool())
            .await?
        else {
            return Ok(None);
        };
        self.detail_for(summary_from_row(&row)?).await.map(Some)
    }

    /// Fetches one message by its remote id within a source.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_message_by_source_id(
        &self,
        source_id: i64,
        source_message_id: &str,
    ) -> Result<Option<MessageDetail>> {
        let sql = format!("{SUMMARY_SELECT} WHERE m.source_id = ? AND m.source_message_id = ?");
        let Some(row) = sqlx::query(&sql)
            .bind(source_id)
            .bind(source_message_id)
            .fetch_optional(self.store.pool())
            .await?
        else {
            return Ok(None);
        };
        self.detail_for(summary_from_row(&row)?).await.map(Some)
    }

    async fn detail_for(&self, summary: MessageSummary) -> Result<MessageDetail> {
        let body = sqlx::query(
            "SELECT body_text, body_html FROM message_bodies WHERE message_id = ?",
        )
        .bind(summary.id)
        .fetch_optional(self.store.pool())
        .await?;

        let (body_text, body_html) = match body {
            Some(row) => (row.try_get("body_text")?, row.try_get("body_html")?),
            None => (None, None),
        };

        let labels: Vec<String> = sqlx::query_scalar(
            "SELECT l.name FROM message_labels ml
             JOIN labels l ON l.id = ml.label_id
             WHERE ml.message_id = ? ORDER BY l.name",
        )
        .bind(summary.id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(MessageDetail {
            summary,
            body_text,
            body_html,
            labels,
        })
    }

    /// Lists attachment rows for a message.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_attachments(&self, message_id: i64) -> Result<Vec<AttachmentRow>> {
        let rows = sqlx::query(
            "SELECT id, message_id, filename, mime_type, content_hash, size_bytes, blob_path
             FROM attachments WHERE message_id = ? ORDER BY id",
        )
        .bind(message_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AttachmentRow {
                    id: row.try_get("id")?,
                    message_id: row.try_get("message_id")?,
                    filename: row.try_get("filename")?,
                    mime_type: row.try_get("mime_type")?,
                    content_hash: row.try_get("content_hash")?,
                    size_bytes: row.try_get("size_bytes")?,
                    blob_path: row.try_get("blob_path")?,
                })
            })
            .collect()
    }

    /// Lists labels for a source.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_labels(&self, source_id: i64) -> Result<Vec<LabelInfo>> {
        let rows = sqlx::query(
            "SELECT id, source_label_id, name, label_type FROM labels
             WHERE source_id = ? ORDER BY name",
        )
        .bind(source_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LabelInfo {
                    id: row.try_get("id")?,
                    source_label_id: row.try_get("source_label_id")?,
                    name: row.try_get("name")?,
                    label_type: row.try_get("label_type")?,
                })
            })
            .collect()
    }
}

/// Escapes LIKE wildcards in user input.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
