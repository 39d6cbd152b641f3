//! Users API
//!
//! Login issues a bearer token for an operator email, provisioning the user
//! row on first sight.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use md_common::User;
use md_engine::{EngineContext, EngineError};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::auth::AuthKeys;
use crate::error::ApiError;

/// Users service state
#[derive(Clone)]
pub struct UsersState {
    pub ctx: Arc<EngineContext>,
    pub auth: Arc<AuthKeys>,
}

/// Login body
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
}

/// Login response
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Log in
///
/// Issues an HS256 bearer token for the given email.
#[utoipa::path(
    post,
    path = "/login",
    tag = "users",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Invalid email")
    )
)]
pub async fn login(
    State(state): State<UsersState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::validation("a valid email is required").into());
    }

    let user = state.ctx.users().find_or_create(email).await?;
    let token = state.auth.issue_token(&user)?;

    info!(user_id = user.id, "Operator logged in");
    Ok(Json(LoginResponse { token, user }))
}

/// Create the users router
pub fn users_router(state: UsersState) -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(login)).with_state(state)
}
