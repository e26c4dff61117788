use axum::{routing::get, Router};

use crate::api::rest::{
    audit::router as audit_router, auth::router as auth_router, config::router as config_router,
    drafts::router as drafts_router, inbox::router as inbox_router,
    lifecycle::router as lifecycle_router,
};

pub mod audit;
pub mod auth;
pub mod config;
pub mod drafts;
pub mod health;
pub mod inbox;
pub mod lifecycle;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .nest("/auth", auth_router())
        .nest("/drafts", drafts_router())
        .nest("/requests", lifecycle_router())
        .nest("/inbox", inbox_router())
        .nest("/audit", audit_router())
        .nest("/config", config_router())
}
