//! Mentions API
//!
//! Operator surface for listing, triaging, and replying to mentions.

use std::sync::Arc;

use axum::extract::{FromRef, Path, Query, State};
use axum::Json;
use md_common::Mention;
use md_engine::{
    ListMentionsOptions, MentionEngine, ReplyOutcome, ReplyRequest, SyncMeta, UpdateMentionPatch,
};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::auth::{AuthKeys, Authenticated};
use crate::error::ApiError;

/// Mentions service state
#[derive(Clone)]
pub struct MentionsState {
    pub engine: Arc<MentionEngine>,
    pub auth: Arc<AuthKeys>,
}

impl FromRef<MentionsState> for Arc<AuthKeys> {
    fn from_ref(state: &MentionsState) -> Self {
        Arc::clone(&state.auth)
    }
}

/// Query parameters for listing mentions
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListMentionsQuery {
    /// Soft deadline in milliseconds before cached data is returned
    pub wait_ms: Option<u64>,
}

/// Sync metadata attached to a mention listing
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetaResponse {
    pub is_syncing: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SyncErrorResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorResponse {
    pub platform: String,
    pub message: String,
}

impl From<SyncMeta> for SyncMetaResponse {
    fn from(meta: SyncMeta) -> Self {
        Self {
            is_syncing: meta.is_syncing,
            errors: meta
                .errors
                .into_iter()
                .map(|e| SyncErrorResponse {
                    platform: e.platform,
                    message: e.message,
                })
                .collect(),
        }
    }
}

/// Mention listing response
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentionListResponse {
    pub result: Vec<Mention>,
    pub meta: SyncMetaResponse,
}

/// Patch body for a mention.
///
/// `userId` distinguishes an absent field from an explicit `null`: null
/// clears the assignment.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMentionRequest {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>, nullable)]
    pub user_id: Option<Option<i64>>,
    #[serde(default)]
    pub disposition: Option<String>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

/// Reply body
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplyToMentionRequest {
    pub content: String,
}

/// Reply response
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplyToMentionResponse {
    /// "submitted" when a reply task ran, "ignored" for rejected duplicates
    pub status: String,
    pub mention: Mention,
    pub task_id: i64,
}

impl From<ReplyOutcome> for ReplyToMentionResponse {
    fn from(outcome: ReplyOutcome) -> Self {
        match outcome {
            ReplyOutcome::Submitted { mention, task } => Self {
                status: "submitted".to_string(),
                mention,
                task_id: task.id,
            },
            ReplyOutcome::Ignored { mention, task } => Self {
                status: "ignored".to_string(),
                mention,
                task_id: task.id,
            },
        }
    }
}

/// List mentions
///
/// Kicks a fetch-and-reconcile in the background, waits up to `waitMs`
/// (default 2000) for it, then returns all mentions newest first.
#[utoipa::path(
    get,
    path = "",
    tag = "mentions",
    params(ListMentionsQuery),
    responses(
        (status = 200, description = "All mentions with sync metadata", body = MentionListResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_mentions(
    State(state): State<MentionsState>,
    auth: Authenticated,
    Query(query): Query<ListMentionsQuery>,
) -> Result<Json<MentionListResponse>, ApiError> {
    let (result, meta) = state
        .engine
        .list_mentions(
            ListMentionsOptions {
                wait_ms: query.wait_ms,
            },
            &auth.0,
        )
        .await?;

    Ok(Json(MentionListResponse {
        result,
        meta: meta.into(),
    }))
}

/// Update a mention
///
/// Assigning a user moves the mention to ASSIGNMENT and records an audit
/// entry; an explicit `userId: null` clears the assignment.
#[utoipa::path(
    put,
    path = "/{id}",
    tag = "mentions",
    params(("id" = i64, Path, description = "Mention id")),
    request_body = UpdateMentionRequest,
    responses(
        (status = 200, description = "Updated mention", body = Mention),
        (status = 404, description = "Mention not found"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_mention(
    State(state): State<MentionsState>,
    auth: Authenticated,
    Path(id): Path<i64>,
    Json(body): Json<UpdateMentionRequest>,
) -> Result<Json<Mention>, ApiError> {
    let mention = state
        .engine
        .update_mention(
            id,
            UpdateMentionPatch {
                user_id: body.user_id,
                disposition: body.disposition,
            },
            &auth.0,
        )
        .await?;

    Ok(Json(mention))
}

/// Reply to a mention
///
/// At most one reply is ever sent per mention; duplicate attempts are
/// reported with status "ignored".
#[utoipa::path(
    post,
    path = "/{id}/reply",
    tag = "mentions",
    params(("id" = i64, Path, description = "Mention id")),
    request_body = ReplyToMentionRequest,
    responses(
        (status = 200, description = "Reply outcome", body = ReplyToMentionResponse),
        (status = 400, description = "Invalid content"),
        (status = 404, description = "Mention not found"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn reply_to_mention(
    State(state): State<MentionsState>,
    auth: Authenticated,
    Path(id): Path<i64>,
    Json(body): Json<ReplyToMentionRequest>,
) -> Result<Json<ReplyToMentionResponse>, ApiError> {
    let outcome = state
        .engine
        .reply_to_mention(
            ReplyRequest {
                mention_id: id,
                content: body.content,
            },
            &auth.0,
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// Create the mentions router
pub fn mentions_router(state: MentionsState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_mentions))
        .routes(routes!(update_mention))
        .routes(routes!(reply_to_mention))
        .with_state(state)
}
