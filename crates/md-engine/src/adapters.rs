//! Mention adapters
//!
//! One adapter per mention type, behind a small trait and a registry. Both
//! concrete adapters delegate to the shared engine pipelines with their own
//! configuration; the seam exists so type-specific behavior has exactly one
//! place to live.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use md_common::{Actor, MentionKind, Task, TaskCode};
use md_gateway::PlatformSyncError;

use crate::engine::EngineContext;
use crate::error::Result;

/// Static configuration of an adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub mention_kind: MentionKind,
    pub fetch_code: TaskCode,
}

/// Result of a fetch-and-reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// The fetch task created, if anything needed fetching
    pub task: Option<Task>,
    /// Per-platform failures collected along the way
    pub errors: Vec<PlatformSyncError>,
}

/// Type-specific mention handling.
#[async_trait]
pub trait MentionAdapter: Send + Sync {
    fn config(&self) -> &AdapterConfig;

    /// Sweep the upstream and reconcile anything new into the store.
    async fn fetch_and_sync(&self, actor: &Actor) -> Result<SyncOutcome>;

    /// Reconcile one fetch task.
    async fn process_fetch_task(&self, task: &Task) -> Result<()>;

    /// Execute one reply task.
    async fn process_reply_task(&self, task: &Task) -> Result<()>;
}

/// Adapter for public comments (and the replies threaded under them).
pub struct CommentAdapter {
    ctx: Arc<EngineContext>,
    config: AdapterConfig,
}

impl CommentAdapter {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            config: AdapterConfig {
                mention_kind: MentionKind::Comment,
                fetch_code: TaskCode::FetchComments,
            },
        }
    }
}

#[async_trait]
impl MentionAdapter for CommentAdapter {
    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn fetch_and_sync(&self, actor: &Actor) -> Result<SyncOutcome> {
        self.ctx.fetch_and_sync(&self.config, actor).await
    }

    async fn process_fetch_task(&self, task: &Task) -> Result<()> {
        self.ctx.process_fetch_task(&self.config, task).await
    }

    async fn process_reply_task(&self, task: &Task) -> Result<()> {
        self.ctx.process_reply_task(task).await
    }
}

/// Adapter for direct messages.
///
/// The aggregator exposes no dedicated message feed, so there is nothing to
/// sweep; message mentions are replied to through the same comment surface.
pub struct MessageAdapter {
    ctx: Arc<EngineContext>,
    config: AdapterConfig,
}

impl MessageAdapter {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            config: AdapterConfig {
                mention_kind: MentionKind::Message,
                fetch_code: TaskCode::FetchMessages,
            },
        }
    }
}

#[async_trait]
impl MentionAdapter for MessageAdapter {
    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn fetch_and_sync(&self, _actor: &Actor) -> Result<SyncOutcome> {
        Ok(SyncOutcome::default())
    }

    async fn process_fetch_task(&self, task: &Task) -> Result<()> {
        self.ctx.process_fetch_task(&self.config, task).await
    }

    async fn process_reply_task(&self, task: &Task) -> Result<()> {
        self.ctx.process_reply_task(task).await
    }
}

/// Registry of adapters indexed by mention type.
#[derive(Default)]
pub struct AdapterRegistry {
    by_kind: HashMap<MentionKind, Arc<dyn MentionAdapter>>,
    all: Vec<Arc<dyn MentionAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one adapter under one or more mention types.
    pub fn register(&mut self, kinds: &[MentionKind], adapter: Arc<dyn MentionAdapter>) {
        for kind in kinds {
            self.by_kind.insert(*kind, Arc::clone(&adapter));
        }
        self.all.push(adapter);
    }

    pub fn for_kind(&self, kind: MentionKind) -> Option<Arc<dyn MentionAdapter>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn for_fetch_code(&self, code: TaskCode) -> Option<Arc<dyn MentionAdapter>> {
        self.all
            .iter()
            .find(|a| a.config().fetch_code == code)
            .cloned()
    }

    /// Every distinct registered adapter, in registration order.
    pub fn all(&self) -> &[Arc<dyn MentionAdapter>] {
        &self.all
    }
}

/// The standard registry: comments handle COMMENT and REPLY mentions,
/// messages handle MESSAGE.
pub fn default_registry(ctx: &Arc<EngineContext>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(
        &[MentionKind::Comment, MentionKind::Reply],
        Arc::new(CommentAdapter::new(Arc::clone(ctx))),
    );
    registry.register(
        &[MentionKind::Message],
        Arc::new(MessageAdapter::new(Arc::clone(ctx))),
    );
    registry
}
