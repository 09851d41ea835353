//! Normalized persistent store backed by SQLite.
//!
//! The store owns every persisted row. Sync and ingestion hold
//! transactions only for the duration of an upsert batch, and writers
//! serialize per source via [`Store::source_write_lock`]; readers are
//! never blocked.

mod messages;
mod model;
pub(crate) mod queries;
mod sync_runs;

pub use model::{
    AttachmentRow, Checkpoint, MessageRow, NewMessage, Source, Stats, SyncRun,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, warn};

use crate::error::Result;

/// The relational store.
pub struct Store {
    pool: SqlitePool,
    fts_enabled: bool,
    write_locks: StdMutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Store {
    /// Opens (creating if needed) the store at the given path and
    /// initializes the schema idempotently.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created. A failure to create the optional full-text
    /// index is tolerated; search degrades to metadata-only.
    pub async fn open(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::initialize(pool).await
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema
    /// creation fails.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let fts_enabled = match sqlx::query(FTS_SCHEMA).execute(&pool).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "FTS5 unavailable; full-text search disabled");
                false
            }
        };

        debug!(fts_enabled, "store initialized");
        Ok(Self {
            pool,
            fts_enabled,
            write_locks: StdMutex::new(HashMap::new()),
        })
    }

    /// Returns the connection pool for read-side query builders.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the full-text index is available.
    #[must_use]
    pub const fn search_full_text(&self) -> bool {
        self.fts_enabled
    }

    /// Begins a transaction for a multi-statement upsert batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Returns the write lock for a source. Ingestion and sync hold this
    /// across their transactions so writes serialize per source while
    /// readers continue unblocked.
    #[must_use]
    pub fn source_write_lock(&self, source_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().expect("write lock map poisoned");
        Arc::clone(locks.entry(source_id).or_default())
    }

    // ---- Sources ----

    /// Fetches a source by identifier, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_or_create_source(
        &self,
        source_type: &str,
        identifier: &str,
    ) -> Result<Source> {
        if let Some(source) = self.get_source_by_identifier(identifier).await? {
            return Ok(source);
        }

        let row = sqlx::query(
            "INSERT INTO sources (source_type, identifier)
             VALUES (?, ?)
             ON CONFLICT(source_type, identifier) DO UPDATE SET updated_at = CURRENT_TIMESTAMP
             RETURNING id, source_type, identifier, sync_cursor",
        )
        .bind(source_type)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(Source {
            id: row.try_get("id")?,
            source_type: row.try_get("source_type")?,
            identifier: row.try_get("identifier")?,
            sync_cursor: row.try_get("sync_cursor")?,
        })
    }

    /// Fetches a source by identifier; `None` when not registered.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_source_by_identifier(&self, identifier: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, source_type, identifier, sync_cursor FROM sources WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(Source {
                id: row.try_get("id")?,
                source_type: row.try_get("source_type")?,
                identifier: row.try_get("identifier")?,
                sync_cursor: row.try_get("sync_cursor")?,
            }),
            None => None,
        })
    }

    /// Records the last confirmed remote history point for a source.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn update_source_sync_cursor(&self, source_id: i64, cursor: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sources SET sync_cursor = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(cursor)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Participants ----

    /// Ensures a participant row exists for the address, returning its id.
    ///
    /// A non-empty display name upgrades an empty one on conflict; a
    /// stored non-empty name is never downgraded to empty.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_participant(
        &self,
        email: &str,
        display_name: &str,
        domain: &str,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        queries::ensure_participant(&mut conn, email, display_name, domain).await
    }

    /// Ensures participant rows for a batch of addresses, returning a map
    /// from email to id. Entries with an empty email are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_participants_batch(
        &self,
        addresses: &[msgvault_mime::Address],
    ) -> Result<HashMap<String, i64>> {
        let mut ids = HashMap::new();
        for address in addresses {
            if address.email.is_empty() {
                continue;
            }
            if ids.contains_key(&address.email) {
                continue;
            }
            let id = self
                .ensure_participant(&address.email, &address.name, &address.domain)
                .await?;
            ids.insert(address.email.clone(), id);
        }
        Ok(ids)
    }

    // ---- Labels ----

    /// Ensures a label row exists, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_label(
        &self,
        source_id: i64,
        source_label_id: &str,
        name: &str,
        label_type: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO labels (source_id, source_label_id, name, label_type)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(source_id, source_label_id) DO UPDATE SET
                 name = excluded.name,
                 label_type = excluded.label_type
             RETURNING id",
        )
        .bind(source_id)
        .bind(source_label_id)
        .bind(name)
        .bind(label_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Ensures label rows for a batch, returning a map from source label
    /// id to internal id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_labels_batch(
        &self,
        source_id: i64,
        labels: &[msgvault_gmail::Label],
    ) -> Result<HashMap<String, i64>> {
        let mut ids = HashMap::new();
        for label in labels {
            let id = self
                .ensure_label(source_id, &label.id, &label.name, &label.label_type)
                .await?;
            ids.insert(label.id.clone(), id);
        }
        Ok(ids)
    }

    // ---- Conversations ----

    /// Ensures a conversation row exists, returning its id. The title is
    /// set from the first message that names it.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_conversation(
        &self,
        source_id: i64,
        source_conversation_id: &str,
        title: &str,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        queries::ensure_conversation(&mut conn, source_id, source_conversation_id, title).await
    }

    /// Recomputes the denormalized counters for a conversation from its
    /// live messages. Sync calls this per ingested message; the offline
    /// analytics rebuild reconciles any remaining drift.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn refresh_conversation_stats(&self, conversation_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        queries::refresh_conversation_stats(&mut conn, conversation_id).await
    }
}

/// Schema statements, applied idempotently at open.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_type TEXT NOT NULL,
        identifier TEXT NOT NULL,
        sync_cursor TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(source_type, identifier)
    )",
    "CREATE TABLE IF NOT EXISTS participants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email_address TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL DEFAULT '',
        domain TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id),
        source_conversation_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        message_count INTEGER NOT NULL DEFAULT 0,
        participant_count INTEGER NOT NULL DEFAULT 0,
        last_message_at TEXT,
        UNIQUE(source_id, source_conversation_id)
    )",
    "CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id),
        source_label_id TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        label_type TEXT NOT NULL DEFAULT 'user',
        UNIQUE(source_id, source_label_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations(id),
        source_id INTEGER NOT NULL REFERENCES sources(id),
        source_message_id TEXT NOT NULL,
        message_type TEXT NOT NULL DEFAULT 'email',
        subject TEXT,
        snippet TEXT,
        sent_at TEXT,
        internal_date TEXT,
        size_estimate INTEGER NOT NULL DEFAULT 0,
        has_attachments INTEGER NOT NULL DEFAULT 0,
        attachment_count INTEGER NOT NULL DEFAULT 0,
        deleted_from_source_at TEXT,
        permanently_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(source_id, source_message_id)
    )",
    "CREATE TABLE IF NOT EXISTS message_bodies (
        message_id INTEGER PRIMARY KEY REFERENCES messages(id),
        body_text TEXT,
        body_html TEXT
    )",
    "CREATE TABLE IF NOT EXISTS message_raw (
        message_id INTEGER PRIMARY KEY REFERENCES messages(id),
        raw_data BLOB NOT NULL,
        compression TEXT NOT NULL DEFAULT 'zlib'
    )",
    "CREATE TABLE IF NOT EXISTS message_recipients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id),
        participant_id INTEGER NOT NULL REFERENCES participants(id),
        recipient_type TEXT NOT NULL,
        display_name TEXT NOT NULL DEFAULT '',
        UNIQUE(message_id, participant_id, recipient_type)
    )",
    "CREATE TABLE IF NOT EXISTS message_labels (
        message_id INTEGER NOT NULL REFERENCES messages(id),
        label_id INTEGER NOT NULL REFERENCES labels(id),
        PRIMARY KEY (message_id, label_id)
    )",
    "CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id),
        filename TEXT NOT NULL DEFAULT '',
        mime_type TEXT NOT NULL DEFAULT '',
        content_hash TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        blob_path TEXT NOT NULL,
        UNIQUE(message_id, content_hash)
    )",
    "CREATE TABLE IF NOT EXISTS sync_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id),
        sync_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        finished_at TEXT,
        error_message TEXT,
        page_token TEXT NOT NULL DEFAULT '',
        messages_processed INTEGER NOT NULL DEFAULT 0,
        messages_added INTEGER NOT NULL DEFAULT 0,
        messages_updated INTEGER NOT NULL DEFAULT 0,
        errors_count INTEGER NOT NULL DEFAULT 0,
        final_cursor TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_source
        ON messages(source_id, source_message_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_sent_at
        ON messages(sent_at)",
    "CREATE INDEX IF NOT EXISTS idx_recipients_message
        ON message_recipients(message_id, recipient_type)",
    "CREATE INDEX IF NOT EXISTS idx_recipients_participant
        ON message_recipients(participant_id)",
    "CREATE INDEX IF NOT EXISTS idx_attachments_message
        ON attachments(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_source
        ON sync_runs(source_id, status)",
];

/// Contentless-ish FTS index over searchable message text. Creation may
/// fail on SQLite builds without FTS5; the store then degrades to
/// metadata search.
const FTS_SCHEMA: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    message_id UNINDEXED,
    subject,
    body_text
)";
