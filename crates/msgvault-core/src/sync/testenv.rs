//! Shared fixture for sync tests.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use msgvault_gmail::{MockApi, Profile};

use crate::error::Result;
use crate::store::Store;
use crate::sync::{Summary, SyncOptions, Syncer};

pub(crate) const TEST_EMAIL: &str = "test@example.com";

/// A minimal valid message used across sync tests.
pub(crate) const TEST_MIME: &[u8] = b"From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Subject: Test Message\r\n\
Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
Content-Type: text/plain; charset=\"utf-8\"\r\n\
\r\n\
This is a test message body.\r\n";

pub(crate) struct TestEnv {
    pub store: Arc<Store>,
    pub mock: Arc<MockApi>,
    attachments: tempfile::TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let store = Arc::new(Store::in_memory().await.expect("open in-memory store"));
        let mock = Arc::new(MockApi::new());
        mock.set_profile(Profile {
            email_address: TEST_EMAIL.to_string(),
            history_id: 1000,
            ..Profile::default()
        });
        Self {
            store,
            mock,
            attachments: tempfile::tempdir().expect("create attachments dir"),
        }
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.attachments.path().to_path_buf()
    }

    pub fn syncer(&self) -> Syncer {
        let options = SyncOptions {
            attachments_dir: self.attachments_dir(),
            ..SyncOptions::default()
        };
        Syncer::new(self.mock.clone(), self.store.clone(), options)
    }

    /// Sets the profile's message total and history id.
    pub fn seed_profile(&self, total: i64, history_id: u64) {
        self.mock.set_profile(Profile {
            email_address: TEST_EMAIL.to_string(),
            messages_total: total,
            history_id,
            ..Profile::default()
        });
    }

    /// Registers a source with a sync cursor, as left by a full sync.
    pub async fn seed_source_with_cursor(&self, cursor: &str) -> i64 {
        let source = self
            .store
            .get_or_create_source("gmail", TEST_EMAIL)
            .await
            .expect("create source");
        self.store
            .update_source_sync_cursor(source.id, cursor)
            .await
            .expect("set cursor");
        source.id
    }

    pub async fn run_full(&self) -> Result<Summary> {
        self.syncer().full(&CancellationToken::new(), TEST_EMAIL).await
    }

    pub async fn run_incremental(&self) -> Result<Summary> {
        self.syncer()
            .incremental(&CancellationToken::new(), TEST_EMAIL)
            .await
    }
}
