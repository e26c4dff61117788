use std::sync::Arc;

use axum::{extract::{Extension, Path}, http::StatusCode, routing::get, Json, Router};
use uuid::Uuid;

use crate::{
    infrastructure::state::AppState,
    services::{audit, errors::EngineError},
};

pub fn router() -> Router {
    Router::new().route("/requests/:id", get(by_request))
}

async fn by_request(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<audit::AuditEventWithChanges>>, (StatusCode, Json<serde_json::Value>)> {
    let events = audit::by_request(&state.pool, id)
        .await
        .map_err(|err| to_response(EngineError::from(err)))?;
    Ok(Json(events))
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}
