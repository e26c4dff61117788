use std::sync::Arc;

use axum::{
    async_trait, extract::FromRequestParts, http::request::Parts, response::IntoResponse, Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::models::AccessScope, infrastructure::state::AppState, services::errors::EngineError,
};

/// One team membership carried on the token: a role code (e.g. `MANAGER`,
/// `FINANCE`) scoped to a single team. A user with scopes on several teams
/// gets one entry per team, mirroring the `AccessScope` rows they were
/// issued from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeClaim {
    pub team_id: Uuid,
    pub role_lookup_id: Uuid,
    pub role_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub scopes: Vec<ScopeClaim>,
    pub exp: usize,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub fn issue_token(
    state: &AppState,
    user_id: Uuid,
    scopes: Vec<ScopeClaim>,
) -> Result<String, EngineError> {
    let expiration = chrono::Utc::now()
        + chrono::Duration::from_std(state.config.jwt_ttl())
            .map_err(|_| EngineError::Internal("failed to calculate expiration".into()))?;
    let claims = Claims {
        sub: user_id,
        scopes,
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &state.jwt_keys.encoding,
    )
    .map_err(|err| EngineError::Internal(err.to_string()))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("invalid authorization token")]
    Invalid,
    #[error("missing application state")]
    MissingState,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::UNAUTHORIZED;
        let message = match self {
            AuthError::Missing => "missing authorization header",
            AuthError::Invalid => "invalid authorization token",
            AuthError::MissingState => "application state unavailable",
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub scopes: Vec<ScopeClaim>,
}

impl AuthenticatedUser {
    pub fn has_role_on_team(&self, team_id: Uuid, role_code: &str) -> bool {
        self.scopes
            .iter()
            .any(|s| s.team_id == team_id && s.role_code.eq_ignore_ascii_case(role_code))
    }

    pub fn role_lookup_ids_on_team(&self, team_id: Uuid) -> Vec<Uuid> {
        self.scopes
            .iter()
            .filter(|s| s.team_id == team_id)
            .map(|s| s.role_lookup_id)
            .collect()
    }

    pub fn team_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.scopes.iter().map(|s| s.team_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn from_access_scopes(user_id: Uuid, scopes: &[AccessScope], role_codes: &std::collections::HashMap<Uuid, String>) -> Self {
        let scopes = scopes
            .iter()
            .filter(|s| s.active)
            .filter_map(|s| {
                role_codes.get(&s.role_lookup_id).map(|code| ScopeClaim {
                    team_id: s.team_id,
                    role_lookup_id: s.role_lookup_id,
                    role_code: code.clone(),
                })
            })
            .collect();
        Self { user_id, scopes }
    }
}

#[async_trait]
impl FromRequestParts<()> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &()) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<Arc<AppState>>() else {
            return Err(AuthError::MissingState);
        };

        match state.resolve_bypass_user().await {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(err) => {
                warn!(error = ?err, "failed to resolve bypass user");
            }
        }

        let Some(header_value) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Err(AuthError::Missing);
        };
        let header_str = header_value.to_str().map_err(|_| AuthError::Invalid)?;
        let token = header_str
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Invalid)?;
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &state.jwt_keys.decoding, &validation) {
            Ok(data) => Ok(AuthenticatedUser {
                user_id: data.claims.sub,
                scopes: data.claims.scopes,
            }),
            Err(err) => {
                warn!(error = ?err, "failed to decode jwt");
                Err(AuthError::Invalid)
            }
        }
    }
}
