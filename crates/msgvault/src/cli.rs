//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Archive a Gmail mailbox into a local, queryable store.
#[derive(Parser, Debug)]
#[command(name = "msgvault", version, about)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the store (database and directory layout).
    InitDb,

    /// Register an account and point it at stored credentials.
    AddAccount {
        /// Account identifier (the email address).
        account: String,
    },

    /// Run a full sync: enumerate and archive every message.
    SyncFull {
        /// Account identifier.
        account: String,
        /// Stop after processing this many messages.
        #[arg(long)]
        limit: Option<i64>,
        /// Only messages after this date (YYYY-MM-DD).
        #[arg(long)]
        after: Option<String>,
        /// Only messages before this date (YYYY-MM-DD).
        #[arg(long)]
        before: Option<String>,
        /// Extra Gmail search query to restrict the sync.
        #[arg(long)]
        query: Option<String>,
        /// Ignore any interrupted run and start over.
        #[arg(long)]
        no_resume: bool,
    },

    /// Run an incremental sync from the saved history cursor.
    ///
    /// Exits 2 when the cursor has expired; run a full sync then.
    SyncIncremental {
        /// Account identifier.
        account: String,
    },

    /// Search the archive.
    Search {
        /// Query, e.g. `from:alice@example.com has:attachment report`.
        query: Vec<String>,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
        /// Maximum results.
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Results to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Print archive statistics.
    Stats,

    /// Reconcile local counts against the remote mailbox.
    Verify {
        /// Account identifier.
        account: String,
        /// Random messages to spot-check for raw MIME integrity.
        #[arg(long, default_value_t = 10)]
        sample: i64,
    },

    /// Write a message's raw RFC 822 bytes to a file.
    ExportEml {
        /// Internal message id (as shown by `search --json`).
        message_id: i64,
        /// Output path; defaults to `<message_id>.eml`.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Manage deletion manifests.
    #[command(subcommand)]
    Deletion(DeletionCommand),
}

/// Deletion manifest subcommands.
#[derive(Subcommand, Debug)]
pub enum DeletionCommand {
    /// Create a manifest from a search query.
    Create {
        /// Human-readable manifest name.
        name: String,
        /// Account identifier.
        #[arg(long)]
        account: String,
        /// Search query selecting the messages to delete.
        #[arg(long)]
        query: String,
    },

    /// List manifests by status.
    List {
        /// One of pending, in_progress, completed, failed; all when
        /// omitted.
        #[arg(long)]
        status: Option<String>,
    },

    /// Execute a manifest.
    Execute {
        /// Manifest id (ULID).
        manifest_id: String,
        /// Deletion method: trash or delete.
        #[arg(long, default_value = "trash")]
        method: String,
        /// Checkpoint interval in messages.
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Do not resume an interrupted execution.
        #[arg(long)]
        no_resume: bool,
        /// Use the remote batch-delete endpoint (permanent deletion).
        #[arg(long)]
        batch: bool,
    },

    /// Cancel (remove) a pending manifest.
    Cancel {
        /// Manifest id (ULID).
        manifest_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_full_flags() {
        let cli = Cli::parse_from([
            "msgvault",
            "sync-full",
            "a@b.com",
            "--limit",
            "100",
            "--after",
            "2024-01-01",
        ]);
        match cli.command {
            Command::SyncFull {
                account,
                limit,
                after,
                ..
            } => {
                assert_eq!(account, "a@b.com");
                assert_eq!(limit, Some(100));
                assert_eq!(after.as_deref(), Some("2024-01-01"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_deletion_execute_defaults() {
        let cli = Cli::parse_from(["msgvault", "deletion", "execute", "01ARZ3NDEKTSV4RRFFQ69G5FAV"]);
        match cli.command {
            Command::Deletion(DeletionCommand::Execute {
                method,
                batch_size,
                no_resume,
                batch,
                ..
            }) => {
                assert_eq!(method, "trash");
                assert_eq!(batch_size, 100);
                assert!(!no_resume);
                assert!(!batch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
