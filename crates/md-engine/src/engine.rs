//! Outbox & mention engine
//!
//! The heart of the system: operator-facing operations (`list_mentions`,
//! `update_mention`, `reply_to_mention`), the fetch and reply pipelines, and
//! task recovery. All long-running work is modeled as outbox tasks in the
//! store, never as in-process state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use md_common::{Actor, AuditEvent, Mention, MentionKind, MentionState, Task, TaskCode};
use md_gateway::{Clock, Comment, PlatformSyncError, Post, Sleeper, SocialGateway};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::{AdapterConfig, AdapterRegistry, SyncOutcome};
use crate::audits::AuditRepository;
use crate::error::{EngineError, Result};
use crate::fanout::{process_batched, FanOutConfig};
use crate::mentions::MentionRepository;
use crate::store::Store;
use crate::tasks::TaskRepository;
use crate::users::UserRepository;

pub use crate::mentions::NewMention;

/// Maximum reply content length accepted from operators.
const MAX_REPLY_CONTENT_LEN: usize = 10_000;

/// Engine timing knobs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Soft deadline for `list_mentions` before returning cached data
    pub wait_ms: u64,
    /// Reply task staleness window
    pub reply_interval: Duration,
    /// Fetch task dedup and recovery window
    pub fetch_interval: Duration,
    /// Fan-out limit across posts and recovered tasks
    pub fan_out: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wait_ms: 2_000,
            reply_interval: Duration::from_secs(300),
            fetch_interval: Duration::from_secs(600),
            fan_out: 10,
        }
    }
}

/// Shared dependencies for the engine and its adapters.
pub struct EngineContext {
    pub(crate) store: Store,
    pub(crate) mentions: MentionRepository,
    pub(crate) tasks: TaskRepository,
    pub(crate) audits: AuditRepository,
    pub(crate) users: UserRepository,
    pub(crate) social: Arc<SocialGateway>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) settings: EngineSettings,
}

impl EngineContext {
    pub fn new(
        store: Store,
        social: Arc<SocialGateway>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let pool = store.pool().clone();
        Arc::new(Self {
            mentions: MentionRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            audits: AuditRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            store,
            social,
            clock,
            sleeper,
            settings,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn social(&self) -> &Arc<SocialGateway> {
        &self.social
    }

    pub fn mentions(&self) -> &MentionRepository {
        &self.mentions
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    pub fn audits(&self) -> &AuditRepository {
        &self.audits
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    fn window_start(&self, window: Duration) -> DateTime<Utc> {
        self.now() - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::zero())
    }

    // ========================================================================
    // Fetch pipeline
    // ========================================================================

    /// Sweep recent posts, filter out those already covered by a fetch task
    /// inside the window, and reconcile the remainder through a new task.
    pub(crate) async fn fetch_and_sync(
        &self,
        config: &AdapterConfig,
        actor: &Actor,
    ) -> Result<SyncOutcome> {
        let recent = self.social.list_recent_posts(actor).await;
        let window_start = self.window_start(self.settings.fetch_interval);

        let mut fresh = Vec::new();
        for post in recent.posts {
            if self
                .tasks
                .recently_fetched(config.fetch_code, &post.id, window_start)
                .await?
            {
                debug!(post_id = %post.id, "Post already covered by a recent fetch task");
            } else {
                fresh.push(post);
            }
        }

        if fresh.is_empty() {
            debug!(code = %config.fetch_code, "Nothing new to fetch");
            return Ok(SyncOutcome {
                task: None,
                errors: recent.errors,
            });
        }

        let data = serde_json::json!({ "posts": &fresh });
        let task = self
            .tasks
            .insert(config.fetch_code, &data, &actor.email, Some(self.now()))
            .await?;
        info!(
            task_id = task.id,
            code = %config.fetch_code,
            posts = fresh.len(),
            "Created fetch task"
        );

        self.process_fetch_task(config, &task).await?;

        Ok(SyncOutcome {
            task: Some(task),
            errors: recent.errors,
        })
    }

    /// Reconcile one fetch task: list comments per post with bounded
    /// fan-out, upsert each non-empty batch, then mark the task finished
    /// with its `posts` collapsed to ids and the flat comment list attached.
    ///
    /// Per-post failures are logged and skipped; the task is still finished
    /// so the recovery loop does not spin on a permanently broken post.
    pub(crate) async fn process_fetch_task(
        &self,
        config: &AdapterConfig,
        task: &Task,
    ) -> Result<()> {
        let posts: Vec<Post> = match task.data.get("posts") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => Vec::new(),
        };

        if posts.is_empty() {
            // Collapsed or malformed payload; close it out rather than spin
            self.tasks
                .finish(task.id, &task.data, self.now())
                .await?;
            return Ok(());
        }

        let actor = Actor::new(0, task.created_by.clone());
        let kind = config.mention_kind;
        let task_id = task.id;

        let fan_out = FanOutConfig::with_limit(self.settings.fan_out);
        let batches = process_batched(
            posts.clone(),
            &fan_out,
            |post| {
                let actor = actor.clone();
                async move {
                    let comments = self.social.list_comments(&post, &actor).await?;
                    if !comments.is_empty() {
                        let rows = comments
                            .iter()
                            .map(|c| self.comment_to_mention(c, kind, task_id))
                            .collect::<Vec<_>>();
                        let created = self.mentions.upsert_batch(&rows).await?;
                        debug!(
                            post_id = %post.id,
                            fetched = comments.len(),
                            created = created,
                            "Ingested comment batch"
                        );
                        metrics::counter!("engine.mentions.ingested_total").increment(created);
                    }
                    Ok::<Vec<Comment>, EngineError>(comments)
                }
            },
            |index, e| {
                warn!(task_id = task_id, post_index = index, error = %e, "Comment fetch failed for post, continuing");
            },
        )
        .await?;

        let comments: Vec<Comment> = batches.into_iter().flatten().collect();
        let post_ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        let data = serde_json::json!({ "posts": &post_ids, "comments": &comments });
        self.tasks.finish(task.id, &data, self.now()).await?;

        info!(
            task_id = task.id,
            posts = post_ids.len(),
            comments = comments.len(),
            "Fetch task finished"
        );
        Ok(())
    }

    fn comment_to_mention(&self, comment: &Comment, kind: MentionKind, task_id: i64) -> NewMention {
        NewMention {
            content: comment.comment.clone(),
            social_media_platform_ref: comment.comment_id.clone(),
            social_media_api_post_ref: comment.api_post_id.clone(),
            platform: comment.platform.clone(),
            kind,
            data: serde_json::json!({
                "socialMediaPayload": comment,
                "taskId": task_id,
            }),
        }
    }

    // ========================================================================
    // Reply pipeline
    // ========================================================================

    /// Execute one reply task against the upstream.
    ///
    /// The reply HTTP call runs inside the store transaction on purpose: the
    /// mention update and child insert must commit atomically with the
    /// upstream acknowledgement. The cost is a possible duplicate reply when
    /// the process dies between the upstream call and the commit.
    pub(crate) async fn process_reply_task(&self, task: &Task) -> Result<()> {
        if task.is_ignored() {
            return Ok(());
        }

        let Some(mention_id) = task.mention_id() else {
            warn!(task_id = task.id, "Reply task carries no mentionId, skipping");
            return Ok(());
        };
        let content = task
            .data
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let Some(mention) = self.mentions.find_by_id(mention_id).await? else {
            warn!(
                task_id = task.id,
                mention_id = mention_id,
                "Mention behind reply task has vanished"
            );
            return Ok(());
        };

        let actor = Actor::new(
            task.data.get("actorId").and_then(|v| v.as_i64()).unwrap_or(0),
            task.created_by.clone(),
        );

        let mut tx = self.store.pool().begin().await?;

        match self.social.reply_to_comment(&mention, &content, &actor).await {
            Ok(result) if result.is_success() => {
                let platform_ref = result
                    .platform_ref
                    .clone()
                    .unwrap_or_else(|| format!("reply-task-{}", task.id));
                let child_content = result.content.clone().unwrap_or(content);
                let child_data = serde_json::json!({
                    "socialMediaPayload": &result.raw,
                    "taskId": task.id,
                });

                MentionRepository::insert_reply_child_tx(
                    &mut tx,
                    &mention,
                    &child_content,
                    &platform_ref,
                    child_data,
                    mention.user_id,
                )
                .await?;
                MentionRepository::set_state_tx(&mut tx, mention.id, Some(MentionState::Replied))
                    .await?;
                TaskRepository::update_data_tx(
                    &mut tx,
                    task.id,
                    &serde_json::json!({ "result": &result.raw }),
                    Some(self.now()),
                )
                .await?;
                tx.commit().await?;

                info!(
                    mention_id = mention.id,
                    task_id = task.id,
                    "Reply acknowledged upstream"
                );
                metrics::counter!("engine.replies.sent_total").increment(1);
            }
            Ok(result) => {
                MentionRepository::set_state_tx(
                    &mut tx,
                    mention.id,
                    Some(MentionState::ProviderError),
                )
                .await?;
                TaskRepository::update_data_tx(
                    &mut tx,
                    task.id,
                    &serde_json::json!({ "result": result.raw }),
                    None,
                )
                .await?;
                tx.commit().await?;

                warn!(
                    mention_id = mention.id,
                    task_id = task.id,
                    "Provider rejected reply, task left for recovery"
                );
                metrics::counter!("engine.replies.provider_errors_total").increment(1);
            }
            Err(e) => {
                MentionRepository::set_state_tx(
                    &mut tx,
                    mention.id,
                    Some(MentionState::ProviderError),
                )
                .await?;
                TaskRepository::update_data_tx(
                    &mut tx,
                    task.id,
                    &serde_json::json!({ "result": { "error": e.to_string() } }),
                    None,
                )
                .await?;
                tx.commit().await?;

                warn!(
                    mention_id = mention.id,
                    task_id = task.id,
                    error = %e,
                    "Reply failed upstream, task left for recovery"
                );
            }
        }

        Ok(())
    }
}

// ============================================================================
// Operator-facing engine
// ============================================================================

/// Options for `list_mentions`.
#[derive(Debug, Clone, Default)]
pub struct ListMentionsOptions {
    pub wait_ms: Option<u64>,
}

/// Sync metadata returned alongside the mention list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    pub is_syncing: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<PlatformSyncError>,
}

/// Patch for `update_mention`. `user_id` distinguishes "not provided"
/// (outer `None`) from an explicit null (inner `None`), which clears the
/// assignment.
#[derive(Debug, Clone, Default)]
pub struct UpdateMentionPatch {
    pub user_id: Option<Option<i64>>,
    pub disposition: Option<String>,
}

/// Operator reply request.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub mention_id: i64,
    pub content: String,
}

/// Outcome of a reply submission.
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// A reply task was created and processed best-effort
    Submitted { mention: Mention, task: Task },
    /// The store rejected a duplicate; recorded as an ignored task
    Ignored { mention: Mention, task: Task },
}

enum Submission {
    Created(Task),
    Ignored(Task),
}

pub struct MentionEngine {
    ctx: Arc<EngineContext>,
    adapters: AdapterRegistry,
}

impl MentionEngine {
    pub fn new(ctx: Arc<EngineContext>, adapters: AdapterRegistry) -> Arc<Self> {
        Arc::new(Self { ctx, adapters })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// List all mentions, racing a background fetch-and-reconcile against the
    /// caller's wait budget. If the sync finishes in time the caller gets
    /// fresh data; otherwise the last known snapshot with `is_syncing=true`.
    /// The background sync keeps running to completion either way.
    pub async fn list_mentions(
        self: &Arc<Self>,
        options: ListMentionsOptions,
        actor: &Actor,
    ) -> Result<(Vec<Mention>, SyncMeta)> {
        let wait = Duration::from_millis(options.wait_ms.unwrap_or(self.ctx.settings.wait_ms));

        // Reply recovery piggybacks on operator reads
        let recovery = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = recovery.recover_once(TaskCode::ReplyMention).await {
                warn!(error = %e, "On-demand reply recovery failed");
            }
        });

        let engine = Arc::clone(self);
        let sync_actor = actor.clone();
        let mut sync = tokio::spawn(async move { engine.sync_all(&sync_actor).await });

        let meta = tokio::select! {
            result = &mut sync => match result {
                Ok(errors) => SyncMeta { is_syncing: false, errors },
                Err(e) => {
                    warn!(error = %e, "Background sync task failed");
                    SyncMeta { is_syncing: false, errors: Vec::new() }
                }
            },
            _ = self.ctx.sleeper.sleep(wait) => SyncMeta { is_syncing: true, errors: Vec::new() },
        };

        let mentions = self.ctx.mentions.list_all().await?;
        Ok((mentions, meta))
    }

    async fn sync_all(&self, actor: &Actor) -> Vec<PlatformSyncError> {
        let mut errors = Vec::new();
        for adapter in self.adapters.all() {
            match adapter.fetch_and_sync(actor).await {
                Ok(outcome) => errors.extend(outcome.errors),
                Err(e) => {
                    warn!(error = %e, "Fetch-and-sync failed");
                    errors.push(PlatformSyncError {
                        platform: "all".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        errors
    }

    /// Patch a mention. Assigning a user moves it to ASSIGNMENT and writes
    /// an audit entry; an explicit null clears a previous assignment without
    /// one.
    pub async fn update_mention(
        &self,
        id: i64,
        patch: UpdateMentionPatch,
        actor: &Actor,
    ) -> Result<Mention> {
        let mention = self
            .ctx
            .mentions
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Mention", id))?;

        let (set_state, new_state, audit_user) = match patch.user_id {
            Some(Some(user_id)) => {
                if self.ctx.users.find_by_id(user_id).await?.is_none() {
                    return Err(EngineError::validation(format!(
                        "user {user_id} does not exist"
                    )));
                }
                (true, Some(MentionState::Assignment), Some(user_id))
            }
            Some(None) if mention.user_id.is_some() => (true, None, None),
            _ => (false, None, None),
        };

        let mut tx = self.ctx.store.pool().begin().await?;
        let updated = MentionRepository::apply_patch_tx(
            &mut tx,
            id,
            patch.user_id.is_some(),
            patch.user_id.flatten(),
            patch.disposition.is_some(),
            patch.disposition.clone(),
            set_state,
            new_state,
        )
        .await?;

        if let Some(user_id) = audit_user {
            AuditRepository::insert_tx(
                &mut tx,
                AuditEvent::Assignment,
                &serde_json::json!({ "mentionId": id, "userId": user_id }),
                &actor.email,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            mention_id = id,
            actor = %actor.email,
            assigned = audit_user.is_some(),
            "Mention updated"
        );
        Ok(updated)
    }

    /// Submit a reply for a mention. Exactly one live reply task can exist
    /// per mention; concurrent or repeated attempts land as ignored tasks.
    pub async fn reply_to_mention(
        self: &Arc<Self>,
        request: ReplyRequest,
        actor: &Actor,
    ) -> Result<ReplyOutcome> {
        Self::validate_reply(&request, actor)?;

        let mention = self
            .ctx
            .mentions
            .find_by_id(request.mention_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Mention", request.mention_id))?;

        let adapter = self.adapters.for_kind(mention.kind).ok_or_else(|| {
            EngineError::validation(format!("no adapter for mention type {}", mention.kind))
        })?;

        match self.submit_reply(&mention, &request.content, actor).await? {
            Submission::Created(task) => {
                // Best-effort immediate processing so the operator sees the result
                if let Err(e) = adapter.process_reply_task(&task).await {
                    warn!(task_id = task.id, error = %e, "Synchronous reply processing failed");
                }

                let mention = self
                    .ctx
                    .mentions
                    .find_by_id(mention.id)
                    .await?
                    .unwrap_or(mention);
                let task = self.ctx.tasks.find_by_id(task.id).await?.unwrap_or(task);
                Ok(ReplyOutcome::Submitted { mention, task })
            }
            Submission::Ignored(task) => Ok(ReplyOutcome::Ignored { mention, task }),
        }
    }

    fn validate_reply(request: &ReplyRequest, actor: &Actor) -> Result<()> {
        if request.mention_id <= 0 {
            return Err(EngineError::validation("mentionId must be a positive integer"));
        }
        if request.content.is_empty() {
            return Err(EngineError::validation("content must not be empty"));
        }
        if request.content.chars().count() > MAX_REPLY_CONTENT_LEN {
            return Err(EngineError::validation(format!(
                "content exceeds {MAX_REPLY_CONTENT_LEN} characters"
            )));
        }
        if actor.id <= 0 {
            return Err(EngineError::validation("actor id is required"));
        }
        if actor.email.is_empty() {
            return Err(EngineError::validation("actor email is required"));
        }
        Ok(())
    }

    async fn submit_reply(
        &self,
        mention: &Mention,
        content: &str,
        actor: &Actor,
    ) -> Result<Submission> {
        let now = self.ctx.now();
        let cutoff = now
            - ChronoDuration::from_std(self.ctx.settings.reply_interval)
                .unwrap_or_else(|_| ChronoDuration::zero());

        let mut tx = self.ctx.store.pool().begin().await?;
        TaskRepository::delete_stale_unfinished_replies_tx(&mut tx, mention.id, cutoff).await?;

        let data = serde_json::json!({
            "mentionId": mention.id,
            "content": content,
            "actorId": actor.id,
        });

        match TaskRepository::insert_tx(
            &mut tx,
            TaskCode::ReplyMention,
            &data,
            &actor.email,
            Some(now),
            None,
        )
        .await
        {
            Ok(task) => {
                AuditRepository::insert_tx(
                    &mut tx,
                    AuditEvent::ReplyAttempt,
                    &serde_json::json!({
                        "mentionId": mention.id,
                        "content": content,
                        "taskId": task.id,
                    }),
                    &actor.email,
                )
                .await?;
                MentionRepository::set_state_tx(
                    &mut tx,
                    mention.id,
                    Some(MentionState::ReplyAttempt),
                )
                .await?;
                tx.commit().await?;

                metrics::counter!("engine.tasks.created_total", "code" => TaskCode::ReplyMention.as_str())
                    .increment(1);
                Ok(Submission::Created(task))
            }
            Err(e) if e.is_conflict() => {
                tx.rollback().await?;

                let data = serde_json::json!({
                    "mentionId": mention.id,
                    "content": content,
                    "actorId": actor.id,
                    "isIgnored": true,
                });
                let task = self
                    .ctx
                    .tasks
                    .insert_completed(TaskCode::ReplyMentionIgnored, &data, &actor.email, now)
                    .await?;

                info!(
                    mention_id = mention.id,
                    task_id = task.id,
                    "Duplicate reply attempt recorded as ignored"
                );
                metrics::counter!("engine.replies.ignored_total").increment(1);
                Ok(Submission::Ignored(task))
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Recover unfinished tasks of one code inside its window, with bounded
    /// fan-out. Returns how many tasks were processed.
    pub async fn recover_once(&self, code: TaskCode) -> Result<usize> {
        let window = match code {
            TaskCode::ReplyMention => self.ctx.settings.reply_interval,
            TaskCode::FetchComments | TaskCode::FetchMessages => self.ctx.settings.fetch_interval,
            TaskCode::ReplyMentionIgnored => return Ok(0),
        };
        let window_start = self.ctx.window_start(window);
        let tasks = self
            .ctx
            .tasks
            .find_unfinished_in_window(code, window_start)
            .await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        info!(code = %code, count = tasks.len(), "Recovering unfinished tasks");
        let fan_out = FanOutConfig::with_limit(self.ctx.settings.fan_out);
        let processed = process_batched(
            tasks,
            &fan_out,
            |task| async move { self.process_task(&task).await },
            |index, e| warn!(task_index = index, error = %e, "Task recovery failed"),
        )
        .await?;

        Ok(processed.len())
    }

    /// Route a task to its pipeline by code.
    pub async fn process_task(&self, task: &Task) -> Result<()> {
        match task.code {
            TaskCode::ReplyMention => self.ctx.process_reply_task(task).await,
            TaskCode::FetchComments | TaskCode::FetchMessages => {
                let adapter = self.adapters.for_fetch_code(task.code).ok_or_else(|| {
                    EngineError::internal(format!("no adapter for task code {}", task.code))
                })?;
                adapter.process_fetch_task(task).await
            }
            TaskCode::ReplyMentionIgnored => Ok(()),
        }
    }
}
