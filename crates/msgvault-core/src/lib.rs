//! # msgvault-core
//!
//! Core business logic for msgvault, a local Gmail archive.
//!
//! This crate provides:
//! - The normalized SQLite [`store`] (messages, participants,
//!   conversations, labels, raw MIME, attachments, sync runs)
//! - The [`ingest`] pipeline turning raw MIME into a message row graph
//! - The [`sync`] coordinator for resumable full and incremental sync
//! - The [`deletion`] engine executing file-backed deletion manifests
//! - The content-addressed [`attachments`] blob store
//! - The read-side [`query`] facade and [`search`] query parser

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachments;
pub mod deletion;
mod error;
pub mod ingest;
pub mod query;
pub mod search;
pub mod store;
pub mod sync;

pub use attachments::{AttachmentStore, StoredBlob};
pub use error::{Error, Result};
pub use ingest::Ingestor;
pub use query::{GroupBy, ListFilter, QueryEngine, TimeGranularity};
pub use store::Store;
pub use sync::{Summary, SyncOptions, Syncer};
