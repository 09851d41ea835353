//! Content-addressed attachment blob store.
//!
//! Blobs are keyed by the SHA-256 of their content and sharded two levels
//! deep (`aa/bb/<full-hash>`), so identical attachments across messages
//! share one file. Blobs are never deleted here; garbage collection of
//! unreferenced hashes is an offline concern.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

/// A written (or already present) blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// SHA-256 of the content, hex-encoded.
    pub content_hash: String,
    /// Absolute path of the blob file.
    pub path: PathBuf,
    /// Content size in bytes.
    pub size: i64,
}

/// Filesystem blob store rooted at one directory.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    /// Creates a store rooted at `root`. The directory is created on
    /// first write, not here.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the sharded path for a content hash.
    #[must_use]
    pub fn blob_path(&self, content_hash: &str) -> PathBuf {
        let (a, rest) = content_hash.split_at(2.min(content_hash.len()));
        let b = &rest[..2.min(rest.len())];
        self.root.join(a).join(b).join(content_hash)
    }

    /// Writes a blob if it does not already exist, returning its hash and
    /// path. An existing file for the same hash is a success no-op
    /// (content-addressing makes collisions on the same hash identical
    /// content).
    ///
    /// # Errors
    ///
    /// Returns an error for empty input (callers skip empty attachments
    /// before hashing) or on filesystem failure.
    pub async fn write(&self, data: &[u8]) -> Result<StoredBlob> {
        if data.is_empty() {
            return Err(crate::error::Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to store empty attachment",
            )));
        }

        let content_hash = hash_hex(data);
        let path = self.blob_path(&content_hash);
        let blob = StoredBlob {
            content_hash,
            size: data.len() as i64,
            path: path.clone(),
        };

        if tokio::fs::try_exists(&path).await? {
            return Ok(blob);
        }

        if let Some(parent) = path.parent() {
            create_dir_restricted(parent).await?;
        }

        // Create-new semantics: losing a race to another writer of the
        // same hash is fine, the contents are identical.
        match open_create_new(&path, data).await {
            Ok(()) => {
                debug!(path = %path.display(), size = blob.size, "stored attachment blob");
                Ok(blob)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(blob),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads a blob back by hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob does not exist or cannot be read.
    pub async fn read(&self, content_hash: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.blob_path(content_hash)).await?)
    }
}

fn hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(unix)]
async fn create_dir_restricted(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&path)
    })
    .await
    .map_err(|e| io::Error::other(e.to_string()))?
}

#[cfg(not(unix))]
async fn create_dir_restricted(path: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

async fn open_create_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let path = path.to_path_buf();
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(&data)
    })
    .await
    .map_err(|e| io::Error::other(e.to_string()))?
}
