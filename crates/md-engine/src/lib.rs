pub mod adapters;
pub mod audits;
pub mod breaker_store;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod mentions;
pub mod recovery;
pub mod store;
pub mod tasks;
pub mod users;

// Re-export key types
pub use adapters::{
    default_registry, AdapterConfig, AdapterRegistry, CommentAdapter, MentionAdapter,
    MessageAdapter, SyncOutcome,
};
pub use audits::AuditRepository;
pub use breaker_store::PgBreakerStateStore;
pub use engine::{
    EngineContext, EngineSettings, ListMentionsOptions, MentionEngine, NewMention,
    ReplyOutcome, ReplyRequest, SyncMeta, UpdateMentionPatch,
};
pub use error::{EngineError, Result};
pub use fanout::{process_batched, FanOutConfig};
pub use mentions::MentionRepository;
pub use recovery::{spawn_recovery_loops, RecoveryConfig, RecoveryTask};
pub use store::Store;
pub use tasks::TaskRepository;
pub use users::UserRepository;
