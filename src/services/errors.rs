use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::domain::validation::ValidationOutcome;

/// Error kinds from spec.md §7, each mapped to a distinct transport status
/// code by `status_code()`. `ConcurrentUpdate` is the only one the engine
/// retries internally (see `services::requests::with_request_lock`); every
/// other variant surfaces straight to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lookup not found")]
    LookupNotFound,
    #[error("no active configuration for this team and purchase type")]
    ConfigurationMissing,
    #[error("actor lacks the required role or ownership")]
    PermissionDenied,
    #[error("operation is not valid in the request's current status")]
    InvalidTransition,
    #[error("submission validation failed")]
    ValidationFailed(ValidationOutcome),
    #[error("rejection requires a comment of at least {min_chars} characters")]
    RejectionCommentRequired { min_chars: usize },
    #[error("actor already acted on this request at this step")]
    AlreadyActed,
    #[error("workflow or form template violates a structural invariant: {0}")]
    TemplateInvariantViolated(String),
    #[error("could not acquire the request lock after retrying")]
    ConcurrentUpdate,
    #[error("attachment storage backend is unavailable")]
    StorageFailure(String),
    #[error("requested entity not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationOutcome>,
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::LookupNotFound | EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::ConfigurationMissing => StatusCode::FAILED_DEPENDENCY,
            EngineError::PermissionDenied => StatusCode::FORBIDDEN,
            EngineError::InvalidTransition => StatusCode::CONFLICT,
            EngineError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::RejectionCommentRequired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::AlreadyActed => StatusCode::CONFLICT,
            EngineError::TemplateInvariantViolated(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::ConcurrentUpdate => StatusCode::CONFLICT,
            EngineError::StorageFailure(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::LookupNotFound => "lookup_not_found",
            EngineError::ConfigurationMissing => "configuration_missing",
            EngineError::PermissionDenied => "permission_denied",
            EngineError::InvalidTransition => "invalid_transition",
            EngineError::ValidationFailed(_) => "validation_failed",
            EngineError::RejectionCommentRequired { .. } => "rejection_comment_required",
            EngineError::AlreadyActed => "already_acted",
            EngineError::TemplateInvariantViolated(_) => "template_invariant_violated",
            EngineError::ConcurrentUpdate => "concurrent_update",
            EngineError::StorageFailure(_) => "storage_failure",
            EngineError::NotFound => "not_found",
            EngineError::Internal(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            EngineError::ValidationFailed(outcome) => Some(outcome.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.code(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => EngineError::NotFound,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure / deadlock_detected: the only cases
                // the engine retries internally per spec.md §7.
                Some("40001") | Some("40P01") => EngineError::ConcurrentUpdate,
                _ => EngineError::Internal(err.to_string()),
            },
            _ => EngineError::Internal(err.to_string()),
        }
    }
}
