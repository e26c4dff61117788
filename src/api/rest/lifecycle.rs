use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    domain::models::PurchaseRequest,
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{errors::EngineError, requests},
};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_request))
        .route("/:id/submit", post(submit))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/resubmit", post(resubmit))
}

async fn get_request(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::get(&state.pool, id).await.map_err(to_response)?;
    Ok(Json(request))
}

async fn submit(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::submit(&state.pool, &state.lookups, id, user.user_id)
        .await
        .map_err(to_response)?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    role_code: String,
    comment: Option<String>,
}

async fn approve(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApproveRequest>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::approve(
        &state.pool,
        &state.lookups,
        id,
        user.user_id,
        &payload.role_code,
        payload.comment,
    )
    .await
    .map_err(to_response)?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    role_code: String,
    comment: String,
}

async fn reject(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::reject(
        &state.pool,
        &state.lookups,
        &state.config.workflow,
        id,
        user.user_id,
        &payload.role_code,
        payload.comment,
    )
    .await
    .map_err(to_response)?;
    Ok(Json(request))
}

async fn resubmit(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PurchaseRequest>, (StatusCode, Json<serde_json::Value>)> {
    let request = requests::resubmit(&state.pool, &state.lookups, id, user.user_id)
        .await
        .map_err(to_response)?;
    Ok(Json(request))
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}
