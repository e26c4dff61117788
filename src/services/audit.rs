//! Audit Ledger (C9): append-only event stream written by every mutation in
//! `services::requests` (spec.md §4.9). No update or delete path exists —
//! Testable Property 5 depends on that being structurally true, not just
//! conventionally honored.

use serde_json::Value as Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::models::{AuditEvent, AuditEventType, FieldChange};

/// Appends one event. Takes the open transaction a lifecycle operation is
/// already running in, so the audit row commits atomically with the state
/// change it describes (spec.md §4.9, §7: "no partial state is ever
/// persisted").
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    event_type: AuditEventType,
    actor_user_id: Option<Uuid>,
    request_id: Option<Uuid>,
    submission_id: Option<Uuid>,
    metadata: Json,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_events (id, event_type, actor_user_id, request_id, submission_id, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(id)
    .bind(event_type.code())
    .bind(actor_user_id)
    .bind(request_id)
    .bind(submission_id)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Appends a field-level diff row for a `FIELD_UPDATE` event. `field_ref`
/// and `field_name` are mutually informative: a pinned `FormField` id when
/// known, a free-text label otherwise (spec.md §3 `FieldChange`).
pub async fn record_field_change(
    tx: &mut Transaction<'_, Postgres>,
    audit_event_id: Uuid,
    field_ref: Option<Uuid>,
    field_name: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO field_changes (id, audit_event_id, field_id, field_name, old_value, new_value)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(audit_event_id)
    .bind(field_ref)
    .bind(field_name)
    .bind(old_value)
    .bind(new_value)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// One audit event plus its field-level diffs, if any — the shape
/// `audit.by_request` returns per spec.md §6.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEventWithChanges {
    #[serde(flatten)]
    pub event: AuditEvent,
    pub field_changes: Vec<FieldChange>,
}

pub async fn by_request(
    pool: &crate::infrastructure::db::PgPool,
    request_id: Uuid,
) -> Result<Vec<AuditEventWithChanges>, sqlx::Error> {
    let events = sqlx::query_as::<_, AuditEvent>(
        r#"
        SELECT id, event_type, actor_user_id, request_id, submission_id, metadata, created_at
        FROM audit_events
        WHERE request_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    attach_field_changes(pool, events).await
}

pub async fn by_submission(
    pool: &crate::infrastructure::db::PgPool,
    submission_id: Uuid,
) -> Result<Vec<AuditEventWithChanges>, sqlx::Error> {
    let events = sqlx::query_as::<_, AuditEvent>(
        r#"
        SELECT id, event_type, actor_user_id, request_id, submission_id, metadata, created_at
        FROM audit_events
        WHERE submission_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;

    attach_field_changes(pool, events).await
}

pub async fn by_event_type(
    pool: &crate::infrastructure::db::PgPool,
    event_type: AuditEventType,
) -> Result<Vec<AuditEventWithChanges>, sqlx::Error> {
    let events = sqlx::query_as::<_, AuditEvent>(
        r#"
        SELECT id, event_type, actor_user_id, request_id, submission_id, metadata, created_at
        FROM audit_events
        WHERE event_type = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(event_type.code())
    .fetch_all(pool)
    .await?;

    attach_field_changes(pool, events).await
}

async fn attach_field_changes(
    pool: &crate::infrastructure::db::PgPool,
    events: Vec<AuditEvent>,
) -> Result<Vec<AuditEventWithChanges>, sqlx::Error> {
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    let changes = sqlx::query_as::<_, FieldChange>(
        r#"
        SELECT id, audit_event_id, field_id, field_name, old_value, new_value
        FROM field_changes
        WHERE audit_event_id = ANY($1)
        "#,
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(events.len());
    for event in events {
        let field_changes = changes
            .iter()
            .filter(|c| c.audit_event_id == event.id)
            .cloned()
            .collect();
        out.push(AuditEventWithChanges {
            event,
            field_changes,
        });
    }
    Ok(out)
}
