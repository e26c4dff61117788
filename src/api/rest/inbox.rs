use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, routing::get, Json, Router};

use crate::{
    domain::models::PurchaseRequest,
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{errors::EngineError, inbox},
};

pub fn router() -> Router {
    Router::new()
        .route("/approver", get(approver))
        .route("/requestor", get(requestor))
        .route("/finance", get(finance))
}

async fn approver(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PurchaseRequest>>, (StatusCode, Json<serde_json::Value>)> {
    let items = inbox::approver_inbox(&state.pool, user.user_id)
        .await
        .map_err(to_response)?;
    Ok(Json(items))
}

async fn requestor(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PurchaseRequest>>, (StatusCode, Json<serde_json::Value>)> {
    let items = inbox::requestor_inbox(&state.pool, user.user_id)
        .await
        .map_err(to_response)?;
    Ok(Json(items))
}

async fn finance(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PurchaseRequest>>, (StatusCode, Json<serde_json::Value>)> {
    let items = inbox::finance_inbox(&state.pool, user.user_id)
        .await
        .map_err(to_response)?;
    Ok(Json(items))
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}
