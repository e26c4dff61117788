use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    infrastructure::{
        auth::{issue_token, ScopeClaim},
        state::{load_authenticated_user, AppState},
    },
    services::errors::EngineError,
};

pub fn router() -> Router {
    Router::new().route("/login", post(login))
}

/// Developer-convenience login: mints a token for an existing user by id,
/// gated on `auth.developer_credential`. Production token minting (the
/// out-of-scope HTTP/auth collaborator per spec.md §1) is expected to
/// issue tokens some other way; this exists so the REST surface is
/// exercisable end to end without a separate identity provider.
#[derive(Debug, Deserialize)]
struct LoginRequest {
    user_id: Uuid,
    credential: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    scopes: Vec<ScopeClaim>,
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<serde_json::Value>)> {
    if state.config.auth.developer_credential.is_empty()
        || payload.credential != state.config.auth.developer_credential
    {
        return Err(unauthorized());
    }

    let user = load_authenticated_user(&state.pool, payload.user_id)
        .await
        .map_err(|err| to_response(EngineError::Internal(err.to_string())))?;

    let Some(user) = user else {
        return Err(unauthorized());
    };

    let token = issue_token(&state, user.user_id, user.scopes.clone()).map_err(to_response)?;

    Ok(Json(LoginResponse {
        token,
        scopes: user.scopes,
    }))
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "invalid_credentials" })),
    )
}

fn to_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let body = err.to_body();
    (err.status_code(), Json(serde_json::to_value(body).unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_returns_expected_payload() {
        let (status, Json(body)) = unauthorized();

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({ "error": "invalid_credentials" }));
    }
}
