//! msgvault - archive a Gmail mailbox into a local, queryable store.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use msgvault_core::deletion::{self, ManifestStatus};
use msgvault_core::search;
use msgvault_core::{Error as CoreError, QueryEngine, Store, SyncOptions, Syncer};
use msgvault_gmail::{ClientConfig, GmailApi, GmailClient, TokenFile};

use cli::{Cli, Command, DeletionCommand};
use config::Paths;

/// Exit code signalling that the incremental cursor expired and the
/// caller should run a full sync.
const EXIT_HISTORY_EXPIRED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MSGVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match run(cli, &cancel).await {
        Ok(code) => code,
        Err(err) => {
            if err
                .downcast_ref::<CoreError>()
                .is_some_and(|e| matches!(e, CoreError::HistoryExpired))
            {
                eprintln!("error: {err}");
                return ExitCode::from(EXIT_HISTORY_EXPIRED);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; checkpointing and shutting down");
            cancel.cancel();
        }
    });
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<ExitCode> {
    let paths = Paths::resolve()?;

    match cli.command {
        Command::InitDb => {
            std::fs::create_dir_all(&paths.data_dir)?;
            std::fs::create_dir_all(paths.attachments())?;
            let store = open_store(&paths).await?;
            drop(store);
            deletion::Manager::new(paths.deletion())?;
            println!("initialized store at {}", paths.data_dir.display());
        }

        Command::AddAccount { account } => {
            let store = open_store(&paths).await?;
            let source = store.get_or_create_source("gmail", &account).await?;
            info!(account = %account, id = source.id, "account registered");

            let token_path = paths.token_file(&account);
            if token_path.exists() {
                println!("account {account} registered (credentials found)");
            } else {
                println!(
                    "account {account} registered; place OAuth tokens at {} (chmod 600)",
                    token_path.display()
                );
            }
        }

        Command::SyncFull {
            account,
            limit,
            after,
            before,
            query,
            no_resume,
        } => {
            let store = Arc::new(open_store(&paths).await?);
            let client = build_client(&paths, &account)?;

            let options = SyncOptions {
                query: compose_gmail_query(query.as_deref(), after.as_deref(), before.as_deref()),
                limit,
                no_resume,
                attachments_dir: paths.attachments(),
            };

            let syncer = Syncer::new(client, store, options);
            let summary = syncer.full(cancel, &account).await?;
            print_summary("full sync", &summary);
        }

        Command::SyncIncremental { account } => {
            let store = Arc::new(open_store(&paths).await?);
            let client = build_client(&paths, &account)?;

            let options = SyncOptions {
                attachments_dir: paths.attachments(),
                ..SyncOptions::default()
            };
            let syncer = Syncer::new(client, store, options);
            let summary = syncer.incremental(cancel, &account).await?;
            print_summary("incremental sync", &summary);
        }

        Command::Search {
            query,
            json,
            limit,
            offset,
        } => {
            let store = Arc::new(open_store(&paths).await?);
            let engine = QueryEngine::new(store);
            let parsed = search::parse(&query.join(" "));
            let results = engine.search(&parsed, limit, offset).await?;

            if json {
                let rows: Vec<serde_json::Value> = results
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "id": m.id,
                            "source_message_id": m.source_message_id,
                            "subject": m.subject,
                            "from": m.from_email,
                            "sent_at": m.sent_at,
                            "size": m.size_estimate,
                            "has_attachments": m.has_attachments,
                            "deleted": m.deleted,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for message in &results {
                    let date = message
                        .sent_at
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "????-??-??".to_string());
                    println!(
                        "{:>8}  {}  {:<30}  {}",
                        message.id,
                        date,
                        truncate(&message.from_email, 30),
                        message.subject.as_deref().unwrap_or("(no subject)")
                    );
                }
                eprintln!("{} result(s)", results.len());
            }
        }

        Command::Stats => {
            let store = open_store(&paths).await?;
            let stats = store.get_stats().await?;
            println!("messages:     {}", stats.message_count);
            println!("threads:      {}", stats.thread_count);
            println!("participants: {}", stats.participant_count);
            println!("attachments:  {}", stats.attachment_count);
            println!("total size:   {} bytes", stats.total_size_bytes);
        }

        Command::Verify { account, sample } => {
            let store = Arc::new(open_store(&paths).await?);
            let client = build_client(&paths, &account)?;
            return verify(&store, client.as_ref(), cancel, &account, sample).await;
        }

        Command::ExportEml { message_id, out } => {
            let store = open_store(&paths).await?;
            let raw = store
                .get_message_raw(message_id)
                .await
                .with_context(|| format!("no raw MIME stored for message {message_id}"))?;
            let out = out.unwrap_or_else(|| format!("{message_id}.eml").into());
            std::fs::write(&out, &raw)?;
            println!("wrote {} bytes to {}", raw.len(), out.display());
        }

        Command::Deletion(command) => return run_deletion(command, &paths, cancel).await,
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_deletion(
    command: DeletionCommand,
    paths: &Paths,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let manager = Arc::new(deletion::Manager::new(paths.deletion())?);

    match command {
        DeletionCommand::Create {
            name,
            account,
            query,
        } => {
            let store = Arc::new(open_store(paths).await?);
            let engine = QueryEngine::new(store);

            let mut parsed = search::parse(&query);
            parsed.account = Some(account.clone());
            let results = engine.search(&parsed, i64::MAX, 0).await?;
            if results.is_empty() {
                bail!("query matched no messages; refusing to create an empty manifest");
            }

            let remote_ids: Vec<String> = results
                .into_iter()
                .map(|m| m.source_message_id)
                .collect();
            let manifest = manager.create_manifest(
                &name,
                remote_ids,
                deletion::Filters { query, account },
            )?;
            println!(
                "created manifest {} ({} messages, pending)",
                manifest.id,
                manifest.remote_ids.len()
            );
        }

        DeletionCommand::List { status } => {
            let statuses: Vec<ManifestStatus> = match status.as_deref() {
                Some("pending") => vec![ManifestStatus::Pending],
                Some("in_progress") => vec![ManifestStatus::InProgress],
                Some("completed") => vec![ManifestStatus::Completed],
                Some("failed") => vec![ManifestStatus::Failed],
                Some(other) => bail!("unknown status {other}"),
                None => vec![
                    ManifestStatus::Pending,
                    ManifestStatus::InProgress,
                    ManifestStatus::Completed,
                    ManifestStatus::Failed,
                ],
            };

            for status in statuses {
                for manifest in manager.list(status)? {
                    let progress = manifest
                        .execution
                        .as_ref()
                        .map(|e| format!(" ({} ok, {} failed)", e.succeeded, e.failed))
                        .unwrap_or_default();
                    println!(
                        "{}  {:<11}  {:>6} ids  {}{}",
                        manifest.id,
                        status.to_string(),
                        manifest.remote_ids.len(),
                        manifest.name,
                        progress
                    );
                }
            }
        }

        DeletionCommand::Execute {
            manifest_id,
            method,
            batch_size,
            no_resume,
            batch,
        } => {
            let manifest = manager.get_manifest(&manifest_id)?;
            let store = Arc::new(open_store(paths).await?);
            let client = build_client(paths, &manifest.filters.account)?;
            let executor = deletion::Executor::new(manager.clone(), store, client);

            if batch {
                executor.execute_batch(cancel, &manifest_id).await?;
            } else {
                let method = match method.as_str() {
                    "trash" => deletion::Method::Trash,
                    "delete" => deletion::Method::Delete,
                    other => bail!("unknown method {other}; use trash or delete"),
                };
                let options = deletion::ExecuteOptions {
                    method,
                    batch_size,
                    resume: !no_resume,
                };
                executor.execute(cancel, &manifest_id, Some(options)).await?;
            }

            let finished = manager.get_manifest(&manifest_id)?;
            let (succeeded, failed) = finished
                .execution
                .as_ref()
                .map_or((0, 0), |e| (e.succeeded, e.failed));
            println!(
                "manifest {} finished: {} succeeded, {} failed ({})",
                manifest_id, succeeded, failed, finished.status
            );
            if failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }

        DeletionCommand::Cancel { manifest_id } => {
            manager.remove_pending(&manifest_id)?;
            println!("cancelled manifest {manifest_id}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Compares local counts against the remote profile and spot-checks raw
/// MIME rows.
async fn verify(
    store: &Store,
    client: &dyn GmailApi,
    cancel: &CancellationToken,
    account: &str,
    sample: i64,
) -> Result<ExitCode> {
    let source = store
        .get_source_by_identifier(account)
        .await?
        .with_context(|| format!("no source registered for {account}"))?;

    let profile = client.get_profile(cancel).await?;
    let local = store.count_messages_for_source(source.id).await?;
    let with_raw = store.count_messages_with_raw(source.id).await?;

    println!("remote messages: {}", profile.messages_total);
    println!("local messages:  {local}");
    println!("with raw MIME:   {with_raw}");

    let mut ok = true;
    if with_raw < local {
        println!("WARNING: {} messages missing raw MIME", local - with_raw);
        ok = false;
    }

    let sampled = store.get_random_message_ids(source.id, sample).await?;
    let mut unreadable = 0;
    for id in &sampled {
        if store.get_message_raw(*id).await.is_err() {
            unreadable += 1;
        }
    }
    println!(
        "sampled {} message(s), {} unreadable",
        sampled.len(),
        unreadable
    );
    if unreadable > 0 {
        ok = false;
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn open_store(paths: &Paths) -> Result<Store> {
    std::fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("creating {}", paths.data_dir.display()))?;
    let db = paths.database();
    Ok(Store::open(&db.to_string_lossy())
        .await
        .with_context(|| format!("opening store at {}", db.display()))?)
}

fn build_client(paths: &Paths, account: &str) -> Result<Arc<GmailClient>> {
    let config = paths.load_config();
    let tokens = Arc::new(TokenFile::new(paths.token_file(account)));
    let client_config = ClientConfig {
        qps: config.qps.unwrap_or(5.0),
        ..ClientConfig::default()
    };
    Ok(Arc::new(GmailClient::new(tokens, client_config)?))
}

/// Builds the Gmail-side search query from the CLI date flags.
fn compose_gmail_query(query: Option<&str>, after: Option<&str>, before: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(query) = query {
        if !query.is_empty() {
            parts.push(query.to_string());
        }
    }
    // Gmail's search syntax wants slashes in dates.
    if let Some(after) = after {
        parts.push(format!("after:{}", after.replace('-', "/")));
    }
    if let Some(before) = before {
        parts.push(format!("before:{}", before.replace('-', "/")));
    }
    parts.join(" ")
}

fn print_summary(kind: &str, summary: &msgvault_core::Summary) {
    println!(
        "{kind} complete: {} found, {} added, {} skipped, {} errors in {:.1?}",
        summary.messages_found,
        summary.messages_added,
        summary.messages_skipped,
        summary.errors,
        summary.duration
    );
    if summary.was_resumed {
        println!("(resumed from checkpoint {})", summary.resumed_from_token);
    }
    println!("cursor: {}", summary.final_history_id);
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_gmail_query() {
        assert_eq!(compose_gmail_query(None, None, None), "");
        assert_eq!(
            compose_gmail_query(Some("is:unread"), None, None),
            "is:unread"
        );
        assert_eq!(
            compose_gmail_query(None, Some("2024-01-01"), Some("2024-06-30")),
            "after:2024/01/01 before:2024/06/30"
        );
        assert_eq!(
            compose_gmail_query(Some("has:attachment"), Some("2024-01-01"), None),
            "has:attachment after:2024/01/01"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 30), "short");
        let long = "a".repeat(40);
        let cut = truncate(&long, 30);
        assert!(cut.chars().count() <= 30);
        assert!(cut.ends_with('…'));
    }
}
