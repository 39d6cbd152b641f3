//! HTTP surface
//!
//! Thin dispatcher over the mention engine and social gateway. Handlers
//! validate nothing the engine already validates; their job is extraction,
//! dispatch, and status mapping.

pub mod auth;
pub mod error;
pub mod mentions_api;
pub mod status_api;
pub mod users_api;

use std::sync::Arc;

use axum::Router;
use md_engine::MentionEngine;
use md_gateway::SocialGateway;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

pub use auth::{AuthKeys, Authenticated};
pub use error::{ApiError, ErrorResponse};
pub use mentions_api::{mentions_router, MentionsState};
pub use status_api::{status_router, StatusState};
pub use users_api::{users_router, UsersState};

/// Top-level application state handed to the router builder.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MentionEngine>,
    pub social: Arc<SocialGateway>,
    pub auth: Arc<AuthKeys>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mentiondesk API",
        description = "Social mention triage and reply service",
    ),
    tags(
        (name = "mentions", description = "Mention triage operations"),
        (name = "users", description = "Operator login"),
        (name = "status", description = "Liveness and circuit health"),
    )
)]
pub struct ApiDoc;

/// Assemble the `/v1` router and its OpenAPI document.
pub fn build_router(state: AppState) -> (Router, utoipa::openapi::OpenApi) {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest(
            "/v1/mentions",
            mentions_router(MentionsState {
                engine: Arc::clone(&state.engine),
                auth: Arc::clone(&state.auth),
            }),
        )
        .nest(
            "/v1/users",
            users_router(UsersState {
                ctx: Arc::clone(state.engine.context()),
                auth: Arc::clone(&state.auth),
            }),
        )
        .nest(
            "/v1/status",
            status_router(StatusState {
                social: Arc::clone(&state.social),
            }),
        )
        .split_for_parts()
}
