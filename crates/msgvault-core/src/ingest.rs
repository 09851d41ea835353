//! Ingestion pipeline: one raw message to a complete row graph.
//!
//! Everything a message owns (row, body, raw MIME, recipients, labels,
//! attachment rows) commits in a single transaction, so a crash mid-ingest
//! leaves either the whole message or nothing. Attachment blobs are
//! written to the content-addressed store before the transaction commits;
//! a blob without a row is harmless and will be reused on retry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use msgvault_gmail::RawMessage;
use msgvault_mime::Address;

use crate::attachments::AttachmentStore;
use crate::error::{Error, Result};
use crate::store::{queries, NewMessage, Store};

/// Writes parsed messages into the store.
pub struct Ingestor<'a> {
    store: &'a Store,
    attachments: &'a AttachmentStore,
}

impl<'a> Ingestor<'a> {
    /// Creates an ingestor over the given store and blob store.
    #[must_use]
    pub fn new(store: &'a Store, attachments: &'a AttachmentStore) -> Self {
        Self { store, attachments }
    }

    /// Ingests one raw message, returning its internal id.
    ///
    /// `thread_id_hint` is the thread id from the list/history response;
    /// when empty, the raw message's thread id is used, and failing that
    /// the message id itself. `label_map` maps remote label ids to
    /// internal ids; unknown labels are skipped.
    ///
    /// MIME parse failures do not abort: the message is stored with a
    /// placeholder body and the raw bytes are preserved for a later
    /// reparse. Ingesting the same raw twice is a no-op on observable
    /// state apart from `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error for empty raw bytes or on store failure.
    pub async fn ingest(
        &self,
        source_id: i64,
        raw: &RawMessage,
        thread_id_hint: &str,
        label_map: &HashMap<String, i64>,
    ) -> Result<i64> {
        if raw.raw.is_empty() {
            return Err(Error::Gmail(msgvault_gmail::Error::InvalidResponse(
                format!("message {}: empty raw payload", raw.id),
            )));
        }

        let parsed = msgvault_mime::parse_lenient(&raw.raw);
        if !parsed.errors.is_empty() {
            debug!(id = %raw.id, errors = ?parsed.errors, "message parsed with warnings");
        }

        let thread_id = [thread_id_hint, raw.thread_id.as_str(), raw.id.as_str()]
            .into_iter()
            .find(|candidate| !candidate.is_empty())
            .unwrap_or(raw.id.as_str());

        let internal_date = millis_to_datetime(raw.internal_date);
        let sent_at = parsed.date.or(internal_date);

        // Blob writes happen outside the transaction; content addressing
        // makes a stray blob on failure a no-op for the retry.
        let mut stored_attachments = Vec::new();
        for attachment in &parsed.attachments {
            if attachment.data.is_empty() {
                warn!(id = %raw.id, filename = %attachment.filename, "skipping empty attachment");
                continue;
            }
            let blob = self.attachments.write(&attachment.data).await?;
            stored_attachments.push((attachment, blob));
        }

        let mut tx = self.store.begin().await?;

        let conversation_id =
            queries::ensure_conversation(&mut tx, source_id, thread_id, &parsed.subject).await?;

        let mut participant_ids: HashMap<String, i64> = HashMap::new();
        for address in parsed
            .from
            .iter()
            .chain(&parsed.to)
            .chain(&parsed.cc)
            .chain(&parsed.bcc)
        {
            if address.email.is_empty() || participant_ids.contains_key(&address.email) {
                continue;
            }
            let id = queries::ensure_participant(
                &mut tx,
                &address.email,
                &address.name,
                &address.domain,
            )
            .await?;
            participant_ids.insert(address.email.clone(), id);
        }

        let message_id = queries::upsert_message(
            &mut tx,
            &NewMessage {
                conversation_id,
                source_id,
                source_message_id: raw.id.clone(),
                message_type: "email".to_string(),
                subject: some_nonempty(&parsed.subject),
                snippet: some_nonempty(&raw.snippet),
                sent_at,
                internal_date,
                size_estimate: raw.size_estimate,
                has_attachments: !stored_attachments.is_empty(),
                attachment_count: stored_attachments.len() as i64,
            },
        )
        .await?;

        queries::upsert_message_body(&mut tx, message_id, &parsed.body_text, &parsed.body_html)
            .await?;
        if self.store.search_full_text() {
            queries::upsert_fts(&mut tx, message_id, &parsed.subject, &parsed.body_text).await?;
        }
        queries::upsert_message_raw(&mut tx, message_id, &raw.raw).await?;

        for (recipient_type, addresses) in [
            ("from", &parsed.from),
            ("to", &parsed.to),
            ("cc", &parsed.cc),
            ("bcc", &parsed.bcc),
        ] {
            let recipients = edge_list(addresses, &participant_ids);
            queries::replace_message_recipients(&mut tx, message_id, recipient_type, &recipients)
                .await?;
        }

        let label_ids: Vec<i64> = raw
            .label_ids
            .iter()
            .filter_map(|remote| label_map.get(remote).copied())
            .collect();
        queries::replace_message_labels(&mut tx, message_id, &label_ids).await?;

        for (attachment, blob) in &stored_attachments {
            queries::upsert_attachment(
                &mut tx,
                message_id,
                &attachment.filename,
                &attachment.mime_type,
                &blob.path.to_string_lossy(),
                &blob.content_hash,
                blob.size,
            )
            .await?;
        }

        queries::refresh_conversation_stats(&mut tx, conversation_id).await?;

        tx.commit().await?;
        Ok(message_id)
    }
}

/// Converts Gmail's Unix-millisecond internal date; zero and negative
/// values mean "unknown".
fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

fn some_nonempty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn edge_list(addresses: &[Address], ids: &HashMap<String, i64>) -> Vec<(i64, String)> {
    addresses
        .iter()
        .filter_map(|address| {
            ids.get(&address.email)
                .map(|id| (*id, address.name.clone()))
        })
        .collect()
}
