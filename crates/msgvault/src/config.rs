//! Data-home resolution and the `config.toml` file.
//!
//! Precedence: the `MSGVAULT_DATA_DIR` environment variable, then a
//! `data_dir` entry in the per-user config file, then a default under the
//! user's data directory.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the data home.
pub const DATA_DIR_ENV: &str = "MSGVAULT_DATA_DIR";

/// Persisted configuration (`config.toml` under the data home, or the
/// per-user config directory for the bootstrap `data_dir` entry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data home override.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Quota budget in queries per second.
    #[serde(default)]
    pub qps: Option<f64>,
}

impl Config {
    fn load_from(path: &PathBuf) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        toml::from_str(&text).ok()
    }
}

/// All the paths the tool works with, rooted at one data home.
#[derive(Debug, Clone)]
pub struct Paths {
    /// The resolved data home.
    pub data_dir: PathBuf,
}

impl Paths {
    /// Resolves the data home from the environment, config file, and
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when no home directory can be determined.
    pub fn resolve() -> Result<Self> {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self {
                    data_dir: PathBuf::from(dir),
                });
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("msgvault").join("config.toml");
            if let Some(config) = Config::load_from(&config_path) {
                if let Some(data_dir) = config.data_dir {
                    return Ok(Self { data_dir });
                }
            }
        }

        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
            .context("cannot determine a home directory for the msgvault data dir")?;
        Ok(Self {
            data_dir: base.join("msgvault"),
        })
    }

    /// The main database file.
    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.data_dir.join("msgvault.db")
    }

    /// Root of the content-addressed attachment blobs.
    #[must_use]
    pub fn attachments(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    /// Root of the deletion manifest directories.
    #[must_use]
    pub fn deletion(&self) -> PathBuf {
        self.data_dir.join("deletion")
    }

    /// The config file inside the data home.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Stored OAuth token for one account, owner-only.
    #[must_use]
    pub fn token_file(&self, account: &str) -> PathBuf {
        self.data_dir.join("tokens").join(format!("{account}.json"))
    }

    /// Loads the config file from the data home, defaulting when absent.
    #[must_use]
    pub fn load_config(&self) -> Config {
        Config::load_from(&self.config_file()).unwrap_or_default()
    }
}
