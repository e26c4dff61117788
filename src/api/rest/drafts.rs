use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    domain::models::{Attachment, FieldValueInput, PurchaseRequest},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{attachments, errors::EngineError, form_templates, requests},
};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create))
        .route("/:id/fields", post(update_field))
        .route("/:id/attachments", post(upload_attachment))
}

#[derive(Debug, Deserialize)]
struct CreateDraftRequest {
    team_id: Uuid,
    purchase_type_code: String,
    #[serde(flatten)]
    header: requests::NewRequestHeader,
}

async fn create(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDraftRequest>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::draft_create(
        &state.pool,
        &state.lookups,
        user.user_id,
        payload.team_id,
        &payload.purchase_type_code,
        payload.header,
    )
    .await
    .map_err(to_response)?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct UpdateFieldRequest {
    field_id: String,
    value: FieldValueInput,
}

async fn update_field(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateFieldRequest>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::get(&state.pool, id).await.map_err(to_response)?;
    let field = form_templates::get_field(&state.pool, request.form_template_id, &payload.field_id)
        .await
        .map_err(to_response)?;

    requests::set_field(&state.pool, &state.lookups, id, user.user_id, &field, payload.value)
        .await
        .map_err(to_response)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn upload_attachment(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Attachment>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::get(&state.pool, id).await.map_err(to_response)?;

    let mut category_name: Option<String> = None;
    let mut filename = String::new();
    let mut mime_type = String::new();
    let mut bytes = bytes::Bytes::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| to_response(EngineError::Internal(err.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "category" => {
                category_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| to_response(EngineError::Internal(err.to_string())))?,
                );
            }
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                bytes = field
                    .bytes()
                    .await
                    .map_err(|err| to_response(EngineError::Internal(err.to_string())))?;
            }
            _ => {}
        }
    }

    if bytes.is_empty() {
        return Err(to_response(EngineError::ValidationFailed(
            crate::domain::validation::ValidationOutcome {
                missing_fields: Vec::new(),
                missing_attachments: vec!["file".to_string()],
            },
        )));
    }

    let category = match category_name {
        Some(name) => attachments::categories_for_team(&state.pool, request.team_id)
            .await
            .map_err(to_response)?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(&name)),
        None => None,
    };

    let attachment = requests::upload_attachment(
        &state.pool,
        &state.lookups,
        state.storage.as_ref(),
        &state.config.attachments,
        id,
        user.user_id,
        category,
        attachments::NewAttachment {
            filename,
            mime_type,
            bytes,
            category_id: None,
            uploaded_by: user.user_id,
            approval_history_ref: None,
        },
    )
    .await
    .map_err(to_response)?;

    Ok(Json(attachment))
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}
