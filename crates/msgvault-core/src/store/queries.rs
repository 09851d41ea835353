//! Connection-level statement helpers shared by the public `Store`
//! methods and the single-transaction ingestion path.

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sqlx::{Row, SqliteConnection};

use super::model::NewMessage;
use crate::error::Result;

/// Compression discriminator written alongside raw MIME blobs.
pub(crate) const COMPRESSION_ZLIB: &str = "zlib";

pub(crate) fn compress_zlib(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(crate) fn decompress(data: &[u8], compression: &str) -> std::io::Result<Vec<u8>> {
    match compression {
        COMPRESSION_ZLIB => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        // Readers tolerate uncompressed rows from older producers.
        _ => Ok(data.to_vec()),
    }
}

pub(crate) async fn ensure_participant(
    conn: &mut SqliteConnection,
    email: &str,
    display_name: &str,
    domain: &str,
) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO participants (email_address, display_name, domain)
         VALUES (?, ?, ?)
         ON CONFLICT(email_address) DO UPDATE SET
             display_name = CASE
                 WHEN excluded.display_name != '' THEN excluded.display_name
                 ELSE participants.display_name
             END
         RETURNING id",
    )
    .bind(email.to_lowercase())
    .bind(display_name)
    .bind(domain.to_lowercase())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get("id")?)
}

pub(crate) async fn ensure_conversation(
    conn: &mut SqliteConnection,
    source_id: i64,
    source_conversation_id: &str,
    title: &str,
) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO conversations (source_id, source_conversation_id, title)
         VALUES (?, ?, ?)
         ON CONFLICT(source_id, source_conversation_id) DO UPDATE SET
             title = CASE
                 WHEN conversations.title = '' THEN excluded.title
                 ELSE conversations.title
             END
         RETURNING id",
    )
    .bind(source_id)
    .bind(source_conversation_id)
    .bind(title)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get("id")?)
}

pub(crate) async fn upsert_message(
    conn: &mut SqliteConnection,
    message: &NewMessage,
) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO messages (
             conversation_id, source_id, source_message_id, message_type,
             subject, snippet, sent_at, internal_date, size_estimate,
             has_attachments, attachment_count
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(source_id, source_message_id) DO UPDATE SET
             conversation_id = excluded.conversation_id,
             subject = excluded.subject,
             snippet = excluded.snippet,
             sent_at = excluded.sent_at,
             internal_date = excluded.internal_date,
             size_estimate = excluded.size_estimate,
             has_attachments = excluded.has_attachments,
             attachment_count = excluded.attachment_count,
             updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(message.conversation_id)
    .bind(message.source_id)
    .bind(&message.source_message_id)
    .bind(&message.message_type)
    .bind(&message.subject)
    .bind(&message.snippet)
    .bind(message.sent_at)
    .bind(message.internal_date)
    .bind(message.size_estimate)
    .bind(message.has_attachments)
    .bind(message.attachment_count)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get("id")?)
}

pub(crate) async fn upsert_message_body(
    conn: &mut SqliteConnection,
    message_id: i64,
    body_text: &str,
    body_html: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO message_bodies (message_id, body_text, body_html)
         VALUES (?, ?, ?)
         ON CONFLICT(message_id) DO UPDATE SET
             body_text = excluded.body_text,
             body_html = excluded.body_html",
    )
    .bind(message_id)
    .bind(body_text)
    .bind(body_html)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn upsert_fts(
    conn: &mut SqliteConnection,
    message_id: i64,
    subject: &str,
    body_text: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM messages_fts WHERE message_id = ?")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO messages_fts (message_id, subject, body_text) VALUES (?, ?, ?)")
        .bind(message_id)
        .bind(subject)
        .bind(body_text)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn upsert_message_raw(
    conn: &mut SqliteConnection,
    message_id: i64,
    raw: &[u8],
) -> Result<()> {
    let compressed = compress_zlib(raw)?;
    sqlx::query(
        "INSERT INTO message_raw (message_id, raw_data, compression)
         VALUES (?, ?, ?)
         ON CONFLICT(message_id) DO UPDATE SET
             raw_data = excluded.raw_data,
             compression = excluded.compression",
    )
    .bind(message_id)
    .bind(compressed)
    .bind(COMPRESSION_ZLIB)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn upsert_attachment(
    conn: &mut SqliteConnection,
    message_id: i64,
    filename: &str,
    mime_type: &str,
    blob_path: &str,
    content_hash: &str,
    size_bytes: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO attachments (
             message_id, filename, mime_type, content_hash, size_bytes, blob_path
         ) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(message_id, content_hash) DO NOTHING",
    )
    .bind(message_id)
    .bind(filename)
    .bind(mime_type)
    .bind(content_hash)
    .bind(size_bytes)
    .bind(blob_path)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn replace_message_labels(
    conn: &mut SqliteConnection,
    message_id: i64,
    label_ids: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM message_labels WHERE message_id = ?")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;

    for label_id in label_ids {
        sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)")
            .bind(message_id)
            .bind(label_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub(crate) async fn replace_message_recipients(
    conn: &mut SqliteConnection,
    message_id: i64,
    recipient_type: &str,
    recipients: &[(i64, String)],
) -> Result<()> {
    sqlx::query("DELETE FROM message_recipients WHERE message_id = ? AND recipient_type = ?")
        .bind(message_id)
        .bind(recipient_type)
        .execute(&mut *conn)
        .await?;

    // Collapse duplicate participants, preferring a non-empty display name.
    let mut order: Vec<i64> = Vec::new();
    let mut names: HashMap<i64, &str> = HashMap::new();
    for (participant_id, display_name) in recipients {
        let entry = names.entry(*participant_id).or_insert_with(|| {
            order.push(*participant_id);
            ""
        });
        if entry.is_empty() && !display_name.is_empty() {
            *entry = display_name;
        }
    }

    for participant_id in order {
        sqlx::query(
            "INSERT INTO message_recipients (
                 message_id, participant_id, recipient_type, display_name
             ) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(participant_id)
        .bind(recipient_type)
        .bind(names[&participant_id])
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn refresh_conversation_stats(
    conn: &mut SqliteConnection,
    conversation_id: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE conversations SET
             message_count = (
                 SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ? AND deleted_from_source_at IS NULL
             ),
             participant_count = (
                 SELECT COUNT(DISTINCT mr.participant_id)
                 FROM message_recipients mr
                 JOIN messages m ON m.id = mr.message_id
                 WHERE m.conversation_id = ?
             ),
             last_message_at = (
                 SELECT MAX(sent_at) FROM messages
                 WHERE conversation_id = ? AND deleted_from_source_at IS NULL
             )
         WHERE id = ?",
    )
    .bind(conversation_id)
    .bind(conversation_id)
    .bind(conversation_id)
    .bind(conversation_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
