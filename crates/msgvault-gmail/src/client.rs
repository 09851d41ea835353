//! Gmail REST client with rate limiting and retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{
    GmailApi, HistoryList, HistoryRecord, Label, LabelChange, MessageList, MessageRef, Profile,
    RawMessage,
};
use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::ratelimit::{Operation, RateLimiter};

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Body substrings that identify quota pushback. Gmail reports rate
/// limiting inconsistently across endpoints; this is the enumerated set
/// observed in practice.
const RATE_LIMIT_MARKERS: [&str; 4] = [
    "rateLimitExceeded",
    "RATE_LIMIT_EXCEEDED",
    "userRateLimitExceeded",
    "quota exceeded",
];

/// Initial retry backoff; doubles per attempt up to [`MAX_BACKOFF`].
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Checks whether a response body signals quota exhaustion.
///
/// Pure and table-driven so the classification is testable without a
/// server.
#[must_use]
pub fn is_rate_limit_error(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Quota budget in queries per second.
    pub qps: f64,
    /// Maximum attempts per request.
    pub max_retries: u32,
    /// Concurrent workers for batch raw fetches.
    pub batch_workers: usize,
    /// API base URL, overridable for tests.
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            qps: 5.0,
            max_retries: 5,
            batch_workers: 4,
            base_url: API_BASE.to_string(),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    tokens: Arc<dyn TokenProvider>,
    max_retries: u32,
    batch_workers: usize,
}

/// Gmail REST client. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct GmailClient {
    inner: Arc<Inner>,
}

impl GmailClient {
    /// Creates a client with the given token provider and configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(tokens: Arc<dyn TokenProvider>, config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.base_url,
                limiter: RateLimiter::new(config.qps),
                tokens,
                max_retries: config.max_retries.max(1),
                batch_workers: config.batch_workers.max(1),
            }),
        })
    }

    /// Issues one rate-limited request with retries, returning the raw
    /// response body on success.
    async fn request(
        &self,
        cancel: &CancellationToken,
        op: Operation,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}{path}", self.inner.base_url);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=self.inner.max_retries {
            self.inner.limiter.acquire(op, cancel).await?;

            let token = self.inner.tokens.access_token().await?;
            let mut req = self
                .inner
                .http
                .request(method.clone(), &url)
                .bearer_auth(token);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(ref body) = body {
                req = req.json(body);
            }

            let response = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = req.send() => result,
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    // Connection-level failures are transient.
                    if attempt == self.inner.max_retries {
                        return Err(Error::Http(err));
                    }
                    warn!(path, attempt, error = %err, "request failed, retrying");
                    self.sleep_backoff(cancel, &mut backoff).await?;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.bytes().await?.to_vec());
            }

            let bytes = response.bytes().await.unwrap_or_default();

            if status == StatusCode::NOT_FOUND {
                return Err(Error::not_found(path));
            }

            if status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN && is_rate_limit_error(&bytes))
            {
                debug!(path, attempt, "rate limited, throttling");
                self.inner.limiter.throttle(backoff);
                if attempt == self.inner.max_retries {
                    return Err(Error::RateLimited(format!("{path}: {}", excerpt(&bytes))));
                }
                self.sleep_backoff(cancel, &mut backoff).await?;
                continue;
            }

            if status.is_server_error() {
                warn!(path, attempt, status = status.as_u16(), "server error, retrying");
                if attempt == self.inner.max_retries {
                    return Err(Error::ServerExhausted {
                        status: status.as_u16(),
                        attempts: attempt,
                        message: excerpt(&bytes),
                    });
                }
                self.sleep_backoff(cancel, &mut backoff).await?;
                continue;
            }

            return Err(Error::Api {
                status: status.as_u16(),
                message: excerpt(&bytes),
            });
        }

        Err(Error::RateLimited(format!(
            "{path}: retries exhausted"
        )))
    }

    /// Sleeps the current backoff with jitter, doubling for the next
    /// attempt, unless cancelled first.
    async fn sleep_backoff(
        &self,
        cancel: &CancellationToken,
        backoff: &mut Duration,
    ) -> Result<()> {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = backoff.mul_f64(jitter);

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }

        *backoff = (*backoff * 2).min(MAX_BACKOFF);
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        op: Operation,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let bytes = self
            .request(cancel, op, Method::GET, path, query, None)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::InvalidResponse(format!("{path}: {e}")))
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(200).collect()
}

/// Deserializes a u64 the API may encode as a number or a string.
fn de_u64_flex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Num(u64),
        Str(String),
    }

    match Flex::deserialize(deserializer)? {
        Flex::Num(n) => Ok(n),
        Flex::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Deserializes an i64 the API may encode as a number or a string.
fn de_i64_flex<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex {
        Num(i64),
        Str(String),
    }

    match Flex::deserialize(deserializer)? {
        Flex::Num(n) => Ok(n),
        Flex::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDto {
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    messages_total: i64,
    #[serde(default)]
    threads_total: i64,
    #[serde(deserialize_with = "de_u64_flex", default)]
    history_id: u64,
}

#[derive(Deserialize)]
struct LabelListDto {
    #[serde(default)]
    labels: Vec<LabelDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelDto {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    label_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRefDto {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListDto {
    #[serde(default)]
    messages: Vec<MessageRefDto>,
    #[serde(default)]
    next_page_token: String,
    #[serde(default)]
    result_size_estimate: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageDto {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(deserialize_with = "de_u64_flex", default)]
    history_id: u64,
    #[serde(deserialize_with = "de_i64_flex", default)]
    internal_date: i64,
    #[serde(default)]
    size_estimate: i64,
    #[serde(default)]
    raw: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListDto {
    #[serde(default)]
    history: Vec<HistoryRecordDto>,
    #[serde(default)]
    next_page_token: String,
    #[serde(deserialize_with = "de_u64_flex", default)]
    history_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecordDto {
    #[serde(deserialize_with = "de_u64_flex", default)]
    id: u64,
    #[serde(default)]
    messages_added: Vec<HistoryMessageDto>,
    #[serde(default)]
    messages_deleted: Vec<HistoryMessageDto>,
    #[serde(default)]
    labels_added: Vec<LabelChangeDto>,
    #[serde(default)]
    labels_removed: Vec<LabelChangeDto>,
}

#[derive(Deserialize)]
struct HistoryMessageDto {
    message: MessageRefDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelChangeDto {
    message: MessageRefDto,
    #[serde(default)]
    label_ids: Vec<String>,
}

impl From<MessageRefDto> for MessageRef {
    fn from(dto: MessageRefDto) -> Self {
        Self {
            id: dto.id,
            thread_id: dto.thread_id,
        }
    }
}

impl From<HistoryRecordDto> for HistoryRecord {
    fn from(dto: HistoryRecordDto) -> Self {
        Self {
            id: dto.id,
            messages_added: dto.messages_added.into_iter().map(|m| m.message.into()).collect(),
            messages_deleted: dto
                .messages_deleted
                .into_iter()
                .map(|m| m.message.into())
                .collect(),
            labels_added: dto.labels_added.into_iter().map(Into::into).collect(),
            labels_removed: dto.labels_removed.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<LabelChangeDto> for LabelChange {
    fn from(dto: LabelChangeDto) -> Self {
        Self {
            message: dto.message.into(),
            label_ids: dto.label_ids,
        }
    }
}

#[async_trait]
impl GmailApi for GmailClient {
    async fn get_profile(&self, cancel: &CancellationToken) -> Result<Profile> {
        let dto: ProfileDto = self
            .get_json(cancel, Operation::Profile, "/profile", &[])
            .await?;
        Ok(Profile {
            email_address: dto.email_address,
            messages_total: dto.messages_total,
            threads_total: dto.threads_total,
            history_id: dto.history_id,
        })
    }

    async fn list_labels(&self, cancel: &CancellationToken) -> Result<Vec<Label>> {
        let dto: LabelListDto = self
            .get_json(cancel, Operation::LabelsList, "/labels", &[])
            .await?;
        Ok(dto
            .labels
            .into_iter()
            .map(|l| Label {
                id: l.id,
                name: l.name,
                label_type: l.label_type,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        cancel: &CancellationToken,
        query: &str,
        page_token: &str,
    ) -> Result<MessageList> {
        let mut params = vec![("maxResults", "500".to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }
        if !page_token.is_empty() {
            params.push(("pageToken", page_token.to_string()));
        }

        let dto: MessageListDto = self
            .get_json(cancel, Operation::MessagesList, "/messages", &params)
            .await?;
        Ok(MessageList {
            messages: dto.messages.into_iter().map(Into::into).collect(),
            next_page_token: dto.next_page_token,
            result_size_estimate: dto.result_size_estimate,
        })
    }

    async fn get_message_raw(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<RawMessage> {
        let path = format!("/messages/{message_id}");
        let params = [("format", "raw".to_string())];
        let dto: RawMessageDto = self
            .get_json(cancel, Operation::MessagesGetRaw, &path, &params)
            .await?;

        let raw = URL_SAFE_NO_PAD
            .decode(dto.raw.trim_end_matches('='))
            .map_err(|e| Error::InvalidResponse(format!("{path}: raw payload: {e}")))?;

        Ok(RawMessage {
            id: dto.id,
            thread_id: dto.thread_id,
            label_ids: dto.label_ids,
            snippet: dto.snippet,
            history_id: dto.history_id,
            internal_date: dto.internal_date,
            size_estimate: dto.size_estimate,
            raw,
        })
    }

    async fn get_messages_raw_batch(
        &self,
        cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<Vec<Option<RawMessage>>> {
        let semaphore = Arc::new(Semaphore::new(self.inner.batch_workers));
        let mut set = JoinSet::new();

        for (index, id) in message_ids.iter().enumerate() {
            let client = self.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let id = id.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, client.get_message_raw(&cancel, &id).await)
            });
        }

        let mut results: Vec<Option<RawMessage>> = vec![None; message_ids.len()];
        while let Some(joined) = set.join_next().await {
            let (index, result) =
                joined.map_err(|e| Error::InvalidResponse(format!("batch worker: {e}")))?;
            match result {
                Ok(raw) => results[index] = Some(raw),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(id = %message_ids[index], error = %err, "batch fetch failed");
                }
            }
        }

        Ok(results)
    }

    async fn list_history(
        &self,
        cancel: &CancellationToken,
        start_history_id: u64,
        page_token: &str,
    ) -> Result<HistoryList> {
        let mut params = vec![("startHistoryId", start_history_id.to_string())];
        if !page_token.is_empty() {
            params.push(("pageToken", page_token.to_string()));
        }

        let dto: HistoryListDto = self
            .get_json(cancel, Operation::HistoryList, "/history", &params)
            .await?;
        Ok(HistoryList {
            history: dto.history.into_iter().map(Into::into).collect(),
            next_page_token: dto.next_page_token,
            history_id: dto.history_id,
        })
    }

    async fn trash_message(&self, cancel: &CancellationToken, message_id: &str) -> Result<()> {
        let path = format!("/messages/{message_id}/trash");
        self.request(cancel, Operation::MessagesTrash, Method::POST, &path, &[], None)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, cancel: &CancellationToken, message_id: &str) -> Result<()> {
        let path = format!("/messages/{message_id}");
        self.request(
            cancel,
            Operation::MessagesDelete,
            Method::DELETE,
            &path,
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn batch_delete_messages(
        &self,
        cancel: &CancellationToken,
        message_ids: &[String],
    ) -> Result<()> {
        let body = serde_json::json!({ "ids": message_ids });
        self.request(
            cancel,
            Operation::MessagesBatchDelete,
            Method::POST,
            "/messages/batchDelete",
            &[],
            Some(body),
        )
        .await?;
        Ok(())
    }
}
