//! Attachment Store (C6): files bound to a request and optional category,
//! validated against size/extension rules before the bytes ever reach the
//! blob backend (spec.md §4.6).

use bytes::Bytes;
use chrono::Utc;
use sqlx::{query_as, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    domain::models::{Attachment, AttachmentCategory},
    infrastructure::{config::AttachmentConfig, db::PgPool, storage::{validate_upload, StorageBackend}},
    services::errors::EngineError,
};

pub struct NewAttachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub category_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub approval_history_ref: Option<Uuid>,
}

/// Validates, persists the blob, and inserts the `Attachment` row within
/// the caller's transaction. Categories must belong to the request's team
/// (spec.md §3); callers resolve and pass the category row so this
/// function can check that without an extra round trip.
pub async fn attach(
    tx: &mut Transaction<'_, Postgres>,
    storage: &dyn StorageBackend,
    config: &AttachmentConfig,
    request_id: Uuid,
    request_team_id: Uuid,
    category: Option<&AttachmentCategory>,
    new: NewAttachment,
) -> Result<Attachment, EngineError> {
    if let Some(category) = category {
        if category.team_id != request_team_id {
            return Err(EngineError::PermissionDenied);
        }
    }

    validate_upload(config, &new.filename, new.bytes.len() as u64)
        .map_err(|err| EngineError::ValidationFailed(crate::domain::validation::ValidationOutcome {
            missing_fields: Vec::new(),
            missing_attachments: vec![err.to_string()],
        }))?;

    let storage_ref = format!("requests/{request_id}/{}-{}", Uuid::new_v4(), new.filename);
    storage
        .put(&storage_ref, new.bytes.clone(), &new.mime_type)
        .await
        .map_err(|err| EngineError::StorageFailure(err.to_string()))?;

    let attachment = query_as::<_, Attachment>(
        r#"
        INSERT INTO attachments
            (id, request_id, category_id, filename, storage_ref, file_size, mime_type,
             uploaded_by, uploaded_at, approval_history_ref)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, request_id, category_id, filename, storage_ref, file_size, mime_type,
                  uploaded_by, uploaded_at, approval_history_ref
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request_id)
    .bind(category.map(|c| c.id))
    .bind(&new.filename)
    .bind(&storage_ref)
    .bind(new.bytes.len() as i64)
    .bind(&new.mime_type)
    .bind(new.uploaded_by)
    .bind(Utc::now())
    .bind(new.approval_history_ref)
    .fetch_one(&mut **tx)
    .await?;

    Ok(attachment)
}

/// Categories with `required=true` for a team (spec.md §4.6), used by the
/// submission validator and by clients building the upload form.
pub async fn required_categories(
    pool: &PgPool,
    team_id: Uuid,
) -> Result<Vec<AttachmentCategory>, EngineError> {
    let categories = query_as::<_, AttachmentCategory>(
        r#"
        SELECT id, team_id, name, required, active
        FROM attachment_categories
        WHERE team_id = $1 AND required = true AND active = true
        "#,
    )
    .bind(team_id)
    .fetch_all(pool)
    .await?;
    Ok(categories)
}

pub async fn categories_for_team(
    pool: &PgPool,
    team_id: Uuid,
) -> Result<Vec<AttachmentCategory>, EngineError> {
    let categories = query_as::<_, AttachmentCategory>(
        r#"
        SELECT id, team_id, name, required, active
        FROM attachment_categories
        WHERE team_id = $1 AND active = true
        "#,
    )
    .bind(team_id)
    .fetch_all(pool)
    .await?;
    Ok(categories)
}

pub async fn for_request(pool: &PgPool, request_id: Uuid) -> Result<Vec<Attachment>, EngineError> {
    let attachments = query_as::<_, Attachment>(
        r#"
        SELECT id, request_id, category_id, filename, storage_ref, file_size, mime_type,
               uploaded_by, uploaded_at, approval_history_ref
        FROM attachments
        WHERE request_id = $1
        ORDER BY uploaded_at ASC
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(attachments)
}
