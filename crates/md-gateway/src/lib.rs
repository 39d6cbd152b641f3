pub mod breaker;
pub mod clock;
pub mod error;
pub mod http;
pub mod retry;
pub mod social;

// Re-export key types
pub use breaker::{
    BreakerSnapshot, BreakerStateStore, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitState, InMemoryBreakerStateStore, StateChangeHook,
    DEFAULT_CIRCUIT,
};
pub use clock::{Clock, InstantSleeper, ManualClock, Sleeper, SystemClock, TokioSleeper, TrackingSleeper};
pub use error::GatewayError;
pub use http::{AggregatorClient, HttpClientConfig};
pub use retry::{RetryPolicy, RetryPolicyConfig};
pub use social::{
    CircuitHealth, Comment, HealthSnapshot, HealthStatus, PlatformSyncError, Post, RecentPosts,
    ReferencedTweet, ReplyResult, SocialGateway, SocialGatewayConfig,
};
