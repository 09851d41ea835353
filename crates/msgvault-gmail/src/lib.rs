//! # msgvault-gmail
//!
//! Gmail API client for msgvault.
//!
//! This crate provides:
//! - A weighted token-bucket [`RateLimiter`] with adaptive throttling
//! - The [`GmailApi`] trait covering profile, labels, message listing,
//!   raw fetch, history, and the deletion operations
//! - [`GmailClient`], the `reqwest`-backed implementation with retry,
//!   backoff, and quota-error classification
//! - [`MockApi`], a scripted in-memory double used by sync and deletion
//!   tests
//!
//! All network-crossing calls take a `CancellationToken` and return a
//! distinguished [`Error::Cancelled`] promptly when it fires.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod api;
mod auth;
mod client;
mod error;
mod mock;
mod ratelimit;

pub mod time;

pub use api::{
    GmailApi, HistoryList, HistoryRecord, Label, LabelChange, MessageList, MessageRef, Profile,
    RawMessage,
};
pub use auth::{StaticToken, TokenFile, TokenProvider};
pub use client::{ClientConfig, GmailClient, is_rate_limit_error};
pub use error::{Error, Result};
pub use mock::{MockApi, MockFailure};
pub use ratelimit::{
    DEFAULT_CAPACITY, DEFAULT_QPS, DEFAULT_REFILL_RATE, MIN_QPS, Operation, RateLimiter,
};
