//! Standalone query functions that work with any Connection.
//!
//! Timestamps are passed in by the caller so claim expiry is testable.

use crate::{
    AuditEvent, DatabaseError, DatabaseResult, NewOutboxEmail, OutboxEmail, OutboxStatus,
    StoredTemplate,
};
use chrono::{DateTime, SecondsFormat, Utc};
use email_outbox_dispatcher::{OutboxItem, OutboxStats};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

// ==========================================
// Outbox
// ==========================================

/// Insert a message unless its idempotency key is already queued.
///
/// Returns the new row id, or `None` for a duplicate key.
pub fn enqueue_email(
    conn: &Connection,
    email: &NewOutboxEmail,
    now: DateTime<Utc>,
) -> DatabaseResult<Option<String>> {
    let id = uuid::Uuid::new_v4().to_string();
    let payload = email.payload.as_ref().map(serde_json::to_string).transpose()?;

    let inserted = conn.execute(
        "INSERT INTO email_outbox (id, template, to_email, idempotency_key, payload, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)
         ON CONFLICT(idempotency_key) DO NOTHING",
        params![
            id,
            email.template,
            email.to_email,
            email.idempotency_key,
            payload,
            timestamp(now),
        ],
    )?;

    if inserted == 0 {
        debug!(idempotency_key = %email.idempotency_key, "Duplicate outbox email ignored");
        return Ok(None);
    }
    Ok(Some(id))
}

/// Atomically claim up to `limit` rows, oldest first.
///
/// Claimable rows are `pending` ones plus `processing` ones whose claim is
/// older than `stale_before`.
pub fn claim_pending_emails(
    conn: &Connection,
    limit: usize,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(
        "UPDATE email_outbox
         SET status = 'processing', claimed_at = ?1
         WHERE id IN (
             SELECT id FROM email_outbox
             WHERE status = 'pending'
                OR (status = 'processing' AND claimed_at < ?2)
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?3
         )
         RETURNING rowid, id, template, to_email, idempotency_key, payload, created_at",
    )?;

    let mut claimed = stmt
        .query_map(
            params![timestamp(now), timestamp(stale_before), limit as i64],
            |row| Ok((row.get::<_, i64>(0)?, map_item(row, 1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    // RETURNING does not preserve the subquery order.
    claimed.sort_by(|(a_rowid, a), (b_rowid, b)| {
        a.created_at.cmp(&b.created_at).then(a_rowid.cmp(b_rowid))
    });

    Ok(claimed.into_iter().map(|(_, item)| item).collect())
}

/// Read up to `limit` claimable rows, oldest first, without claiming them.
///
/// Sees the same rows [`claim_pending_emails`] would take.
pub fn peek_pending_emails(
    conn: &Connection,
    limit: usize,
    stale_before: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, template, to_email, idempotency_key, payload, created_at
         FROM email_outbox
         WHERE status = 'pending'
            OR (status = 'processing' AND claimed_at < ?1)
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?2",
    )?;

    let items = stmt
        .query_map(params![timestamp(stale_before), limit as i64], |row| map_item(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

// The outcome updates below only touch a row still held by the claim made at
// `claimed_at`. A claim that expired and was taken over by another run gets
// `ClaimLost` and leaves the row alone.

/// Mark a claimed row delivered.
pub fn mark_email_sent(
    conn: &Connection,
    id: &str,
    claimed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DatabaseResult<()> {
    let updated = conn.execute(
        "UPDATE email_outbox
         SET status = 'sent', sent_at = ?1, claimed_at = NULL, last_error = NULL,
             attempts = attempts + 1
         WHERE id = ?2 AND status = 'processing' AND claimed_at = ?3",
        params![timestamp(now), id, timestamp(claimed_at)],
    )?;
    require_claim(conn, updated, id)
}

/// Mark a claimed row failed with `message`.
pub fn mark_email_error(
    conn: &Connection,
    id: &str,
    claimed_at: DateTime<Utc>,
    message: &str,
) -> DatabaseResult<()> {
    let updated = conn.execute(
        "UPDATE email_outbox
         SET status = 'error', last_error = ?1, claimed_at = NULL,
             attempts = attempts + 1
         WHERE id = ?2 AND status = 'processing' AND claimed_at = ?3",
        params![message, id, timestamp(claimed_at)],
    )?;
    require_claim(conn, updated, id)
}

/// Return a claimed row to `pending` without counting an attempt.
pub fn release_email(conn: &Connection, id: &str, claimed_at: DateTime<Utc>) -> DatabaseResult<()> {
    let updated = conn.execute(
        "UPDATE email_outbox
         SET status = 'pending', claimed_at = NULL
         WHERE id = ?1 AND status = 'processing' AND claimed_at = ?2",
        params![id, timestamp(claimed_at)],
    )?;
    require_claim(conn, updated, id)
}

/// Count rows per status.
///
/// `total_pending` is everything the next claim can take: `pending` rows plus
/// claims older than `stale_before`. `processing` counts live claims only.
pub fn outbox_stats(conn: &Connection, stale_before: DateTime<Utc>) -> DatabaseResult<OutboxStats> {
    let stats = conn.query_row(
        "SELECT
             COALESCE(SUM(status = 'pending' OR (status = 'processing' AND claimed_at < ?1)), 0),
             COALESCE(SUM(status = 'processing' AND claimed_at >= ?1), 0),
             COALESCE(SUM(status = 'sent'), 0),
             COALESCE(SUM(status = 'error'), 0)
         FROM email_outbox",
        params![timestamp(stale_before)],
        |row| {
            Ok(OutboxStats {
                total_pending: row.get::<_, i64>(0)? as u64,
                processing: row.get::<_, i64>(1)? as u64,
                sent: row.get::<_, i64>(2)? as u64,
                error: row.get::<_, i64>(3)? as u64,
            })
        },
    )?;
    Ok(stats)
}

/// Get a full outbox row by id.
pub fn get_outbox_email(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxEmail>> {
    let email = conn
        .query_row(
            "SELECT id, template, to_email, idempotency_key, payload, status, claimed_at,
                    attempts, last_error, created_at, sent_at
             FROM email_outbox WHERE id = ?1",
            params![id],
            |row| {
                Ok(OutboxEmail {
                    id: row.get(0)?,
                    template: row.get(1)?,
                    to_email: row.get(2)?,
                    idempotency_key: row.get(3)?,
                    payload: parse_payload(row, 4)?,
                    status: OutboxStatus::from_str(&row.get::<_, String>(5)?),
                    claimed_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
                    attempts: row.get(7)?,
                    last_error: row.get(8)?,
                    created_at: parse_datetime(row.get::<_, String>(9)?),
                    sent_at: row.get::<_, Option<String>>(10)?.map(parse_datetime),
                })
            },
        )
        .optional()?;
    Ok(email)
}

// ==========================================
// Templates
// ==========================================

/// Insert or replace a template.
pub fn upsert_template(
    conn: &Connection,
    name: &str,
    subject: &str,
    html: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO email_templates (name, subject, html, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET
             subject = excluded.subject,
             html = excluded.html,
             updated_at = excluded.updated_at",
        params![name, subject, html, timestamp(now)],
    )?;
    Ok(())
}

/// Get a template by name.
pub fn get_template(conn: &Connection, name: &str) -> DatabaseResult<Option<StoredTemplate>> {
    let template = conn
        .query_row(
            "SELECT name, subject, html, updated_at FROM email_templates WHERE name = ?1",
            params![name],
            |row| {
                Ok(StoredTemplate {
                    name: row.get(0)?,
                    subject: row.get(1)?,
                    html: row.get(2)?,
                    updated_at: parse_datetime(row.get::<_, String>(3)?),
                })
            },
        )
        .optional()?;
    Ok(template)
}

// ==========================================
// Audit
// ==========================================

/// Append an audit event and return its id.
pub fn insert_audit_event(
    conn: &Connection,
    event_type: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> DatabaseResult<i64> {
    conn.execute(
        "INSERT INTO audit_events (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
        params![event_type, payload.to_string(), timestamp(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List the most recent audit events, newest first.
pub fn list_audit_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<AuditEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, event_type, payload, created_at
         FROM audit_events
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let events = stmt
        .query_map(params![limit as i64], |row| {
            Ok(AuditEvent {
                id: row.get(0)?,
                event_type: row.get(1)?,
                payload: parse_payload(row, 2)?.unwrap_or(serde_json::Value::Null),
                created_at: parse_datetime(row.get::<_, String>(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ==========================================
// Helpers
// ==========================================

fn map_item(row: &Row<'_>, start: usize) -> rusqlite::Result<OutboxItem> {
    Ok(OutboxItem {
        id: row.get(start)?,
        template: row.get(start + 1)?,
        to_email: row.get(start + 2)?,
        idempotency_key: row.get(start + 3)?,
        payload: parse_payload(row, start + 4)?,
        created_at: Some(parse_datetime(row.get::<_, String>(start + 5)?)),
    })
}

fn parse_payload(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn require_claim(conn: &Connection, updated: usize, id: &str) -> DatabaseResult<()> {
    if updated > 0 {
        return Ok(());
    }
    let exists = conn
        .query_row("SELECT 1 FROM email_outbox WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some();
    if exists {
        Err(DatabaseError::ClaimLost(format!("outbox email {id}")))
    } else {
        Err(DatabaseError::NotFound(format!("outbox email {id}")))
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
