//! Access-token plumbing for the API client.
//!
//! Token acquisition (the OAuth browser flow) happens outside this crate;
//! the client only needs something that can hand it a current bearer
//! token.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Supplies bearer tokens to the client.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a currently valid access token.
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, for tests and short-lived invocations.
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a literal access token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct StoredToken {
    access_token: String,
}

/// Reads tokens from a JSON file maintained by the external OAuth flow.
///
/// The file is re-read on every request so an out-of-band refresh is
/// picked up without restarting.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Creates a provider backed by the given token file.
    ///
    /// On Unix a token file readable by group or other draws a warning;
    /// refresh tokens are account credentials.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        check_owner_only(&path);
        Self { path }
    }
}

#[async_trait]
impl TokenProvider for TokenFile {
    async fn access_token(&self) -> Result<String> {
        let bytes = tokio::fs::read(&self.path).await?;
        let stored: StoredToken = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Auth(format!("token file {}: {e}", self.path.display())))?;
        if stored.access_token.is_empty() {
            return Err(Error::Auth("empty access token".to_string()));
        }
        Ok(stored.access_token)
    }
}

#[cfg(unix)]
fn check_owner_only(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "token file is readable by group/other; chmod 600 recommended"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_owner_only(_path: &std::path::Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("ya29.test");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_token_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"access_token":"ya29.stored","expiry":"x"}"#).unwrap();

        let provider = TokenFile::new(&path);
        assert_eq!(provider.access_token().await.unwrap(), "ya29.stored");
    }

    #[tokio::test]
    async fn test_token_file_missing() {
        let provider = TokenFile::new("/nonexistent/token.json");
        assert!(provider.access_token().await.is_err());
    }

    #[tokio::test]
    async fn test_token_file_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"access_token":""}"#).unwrap();

        let provider = TokenFile::new(&path);
        assert!(provider.access_token().await.is_err());
    }
}
