use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::models::{FormTemplate, WorkflowTemplate},
    infrastructure::state::AppState,
    services::{errors::EngineError, team_config},
};

pub fn router() -> Router {
    Router::new().route("/effective_template", get(effective_template))
}

#[derive(Debug, Deserialize)]
struct EffectiveTemplateQuery {
    team_id: Uuid,
    purchase_type_code: String,
}

#[derive(Debug, Serialize)]
struct EffectiveTemplateResponse {
    form_template: FormTemplate,
    workflow_template: WorkflowTemplate,
}

async fn effective_template(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EffectiveTemplateQuery>,
) -> Result<Json<EffectiveTemplateResponse>, (StatusCode, Json<serde_json::Value>)> {
    let purchase_type = state
        .lookups
        .resolve(&state.pool, "PURCHASE_TYPE", &params.purchase_type_code)
        .await
        .map_err(to_response)?;

    let (form_template, workflow_template) =
        team_config::resolve_active(&state.pool, params.team_id, purchase_type.id)
            .await
            .map_err(to_response)?;

    Ok(Json(EffectiveTemplateResponse {
        form_template,
        workflow_template,
    }))
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}
