//! Deletion manifests: durable, file-backed records of deletion batches.
//!
//! A manifest lives as one JSON file under a status directory
//! (`pending/`, `in_progress/`, `completed/`, `failed/`); the directory a
//! file sits in is the authoritative status, and transitions are
//! filesystem renames. This survives crashes without a database and makes
//! the state inspectable with `ls`.

mod executor;

pub use executor::{DeletionProgress, ExecuteOptions, Executor, Method, NullProgress};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Manifest lifecycle states, each backed by a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// Created, not yet executed.
    Pending,
    /// Execution started; also the parking state for interrupted runs.
    InProgress,
    /// Finished with at least one success.
    Completed,
    /// Finished with no successes.
    Failed,
}

impl ManifestStatus {
    /// Directory name for this status.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    const ALL: [Self; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];
}

impl std::fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Snapshot of the filter that selected the manifest's messages, kept for
/// auditability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filters {
    /// The raw search query, if one was used.
    #[serde(default)]
    pub query: String,
    /// Account the filter ran against.
    #[serde(default)]
    pub account: String,
}

/// Progress of a manifest execution, checkpointed as it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Deletion method in use.
    pub method: Method,
    /// When execution first started.
    pub started_at: DateTime<Utc>,
    /// Remote ids confirmed gone (404 counts: the work is already done).
    pub succeeded: i64,
    /// Remote ids that failed with a real error.
    pub failed: i64,
    /// Index into `remote_ids` of the next unprocessed entry. Never
    /// decreases across resumes.
    pub last_processed_index: usize,
    /// The ids behind the `failed` counter.
    #[serde(default)]
    pub failed_ids: Vec<String>,
}

impl Execution {
    /// Fresh execution state for a run starting now.
    #[must_use]
    pub fn start(method: Method) -> Self {
        Self {
            method,
            started_at: Utc::now(),
            succeeded: 0,
            failed: 0,
            last_processed_index: 0,
            failed_ids: Vec::new(),
        }
    }
}

/// A durable deletion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// ULID, also the filename stem.
    pub id: String,
    /// Human-readable description.
    pub name: String,
    /// Lifecycle state; kept in sync with the backing directory.
    pub status: ManifestStatus,
    /// Remote message ids to delete, in order.
    pub remote_ids: Vec<String>,
    /// The filter that selected these ids.
    #[serde(default)]
    pub filters: Filters,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Execution state, present once execution has started.
    pub execution: Option<Execution>,
}

impl Manifest {
    /// Creates a pending manifest with a fresh ULID.
    #[must_use]
    pub fn new(name: impl Into<String>, remote_ids: Vec<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            name: name.into(),
            status: ManifestStatus::Pending,
            remote_ids,
            filters: Filters::default(),
            created_at: Utc::now(),
            execution: None,
        }
    }
}

/// Owns the manifest directory tree.
pub struct Manager {
    root: PathBuf,
}

impl Manager {
    /// Creates a manager rooted at `root`, creating the status
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for status in ManifestStatus::ALL {
            fs::create_dir_all(root.join(status.dir_name()))?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, status: ManifestStatus, id: &str) -> PathBuf {
        self.root.join(status.dir_name()).join(format!("{id}.json"))
    }

    /// Creates and persists a pending manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written.
    pub fn create_manifest(
        &self,
        name: &str,
        remote_ids: Vec<String>,
        filters: Filters,
    ) -> Result<Manifest> {
        let mut manifest = Manifest::new(name, remote_ids);
        manifest.filters = filters;
        self.save_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Writes a manifest into its status directory.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or filesystem failure.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.path_for(manifest.status, &manifest.id);
        let json = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&path, &json)?;
        Ok(())
    }

    /// Loads a manifest by id, searching all status directories. The
    /// returned manifest's `status` reflects the directory it was found
    /// in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestNotFound`] when no directory holds it.
    pub fn get_manifest(&self, id: &str) -> Result<Manifest> {
        for status in ManifestStatus::ALL {
            let path = self.path_for(status, id);
            if path.exists() {
                let mut manifest = read_manifest(&path)?;
                manifest.status = status;
                return Ok(manifest);
            }
        }
        Err(Error::ManifestNotFound(id.to_string()))
    }

    /// Moves a manifest between status directories and updates its status
    /// field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifestStatus`] when the manifest is not
    /// in `from`.
    pub fn move_manifest(
        &self,
        id: &str,
        from: ManifestStatus,
        to: ManifestStatus,
    ) -> Result<()> {
        let from_path = self.path_for(from, id);
        if !from_path.exists() {
            let actual = self
                .get_manifest(id)
                .map(|m| m.status.to_string())
                .unwrap_or_else(|_| "missing".to_string());
            return Err(Error::InvalidManifestStatus {
                id: id.to_string(),
                expected: from.to_string(),
                actual,
            });
        }

        let mut manifest = read_manifest(&from_path)?;
        manifest.status = to;
        let json = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.path_for(to, id), &json)?;
        fs::remove_file(&from_path)?;
        Ok(())
    }

    /// Lists manifests in one status, oldest first (ULIDs sort by time).
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure; unreadable entries are
    /// skipped.
    pub fn list(&self, status: ManifestStatus) -> Result<Vec<Manifest>> {
        let dir = self.root.join(status.dir_name());
        let mut manifests = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(mut manifest) = read_manifest(&path) {
                    manifest.status = status;
                    manifests.push(manifest);
                }
            }
        }

        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    /// Removes a pending manifest (cancellation before execution).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifestStatus`] when the manifest is not
    /// pending.
    pub fn remove_pending(&self, id: &str) -> Result<()> {
        let path = self.path_for(ManifestStatus::Pending, id);
        if !path.exists() {
            let actual = self
                .get_manifest(id)
                .map(|m| m.status.to_string())
                .unwrap_or_else(|_| "missing".to_string());
            return Err(Error::InvalidManifestStatus {
                id: id.to_string(),
                expected: ManifestStatus::Pending.to_string(),
                actual,
            });
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes via a sibling temp file and rename so a crash never leaves a
/// half-written manifest in a status directory.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
