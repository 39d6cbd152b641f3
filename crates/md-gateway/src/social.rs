//! Social gateway
//!
//! Composes one upstream call as `retry(breaker(http))` per platform:
//! retry outermost, breaker inside, HTTP innermost. The breaker therefore
//! counts one failure per underlying attempt, and the retry layer gives up
//! as soon as the breaker opens.

use std::sync::Arc;

use md_common::{Actor, Mention};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::breaker::{CircuitBreakerRegistry, CircuitState};
use crate::error::GatewayError;
use crate::http::AggregatorClient;
use crate::retry::RetryPolicy;

/// Social gateway configuration
#[derive(Debug, Clone)]
pub struct SocialGatewayConfig {
    /// Platforms to poll for history
    pub platforms: Vec<String>,
    /// How far back /history looks, in days
    pub history_last_days: u32,
}

impl Default for SocialGatewayConfig {
    fn default() -> Self {
        Self {
            platforms: vec!["bluesky".to_string()],
            history_last_days: 7,
        }
    }
}

/// A post as returned by the aggregator history endpoint, tagged with the
/// platform it was fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub platform: String,
    #[serde(default)]
    pub post_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPost {
    id: String,
    #[serde(default)]
    post_ids: Vec<String>,
}

/// A platform comment from the aggregator, tagged with the post it was
/// listed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub comment_id: String,
    pub comment: String,
    pub platform: String,
    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedTweet>,
    #[serde(default)]
    pub api_post_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedTweet {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Per-platform failure captured during a history sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSyncError {
    pub platform: String,
    pub message: String,
}

/// Result of a history sweep across all configured platforms.
#[derive(Debug, Clone, Default)]
pub struct RecentPosts {
    pub posts: Vec<Post>,
    pub errors: Vec<PlatformSyncError>,
}

/// Outcome of a reply call, with the raw provider response retained for the
/// task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyResult {
    pub status: String,
    /// Reply content as echoed back by the platform
    pub content: Option<String>,
    /// Platform ref of the created reply
    pub platform_ref: Option<String>,
    pub raw: serde_json::Value,
}

impl ReplyResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    fn from_raw(raw: serde_json::Value, platform: &str) -> Self {
        let success = raw
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let platform_payload = raw.get(platform);
        let content = platform_payload
            .and_then(|p| p.get("comment"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let platform_ref = platform_payload.and_then(|p| p.get("commentId")).map(|v| {
            v.as_str()
                .map(String::from)
                .unwrap_or_else(|| v.to_string())
        });

        Self {
            status: if success { "success" } else { "error" }.to_string(),
            content,
            platform_ref,
            raw,
        }
    }
}

/// Overall health derived from persisted circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitHealth {
    pub platform: String,
    pub healthy: bool,
    pub state: CircuitState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub circuits: Vec<CircuitHealth>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Platform-aware gateway over the upstream aggregator.
pub struct SocialGateway {
    client: Arc<AggregatorClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    config: SocialGatewayConfig,
}

impl SocialGateway {
    pub fn new(
        client: Arc<AggregatorClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        config: SocialGatewayConfig,
    ) -> Self {
        Self {
            client,
            breakers,
            retry,
            config,
        }
    }

    pub fn platforms(&self) -> &[String] {
        &self.config.platforms
    }

    /// One resilient upstream call: retry(breaker(op)).
    async fn platform_call<T, F, Fut>(&self, circuit: &str, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.breakers.get_or_create(circuit).await;
        let gate = Arc::clone(&breaker);
        let should_retry =
            move |e: &GatewayError| gate.current_state() == CircuitState::Closed && e.is_retryable();

        self.retry
            .execute(should_retry, || {
                let breaker = Arc::clone(&breaker);
                let fut = op();
                async move { breaker.execute(|| fut).await }
            })
            .await
    }

    /// Sweep `/history` across every configured platform.
    ///
    /// A platform failure is logged and collected; it never fails the sweep
    /// for the platforms that did respond.
    pub async fn list_recent_posts(&self, actor: &Actor) -> RecentPosts {
        let mut result = RecentPosts::default();

        for platform in &self.config.platforms {
            let client = Arc::clone(&self.client);
            let last_days = self.config.history_last_days;
            let platform_param = platform.clone();

            let response = self
                .platform_call(platform, move || {
                    let client = Arc::clone(&client);
                    let platform = platform_param.clone();
                    async move {
                        client
                            .get_json::<HistoryResponse>(
                                "/history",
                                &[
                                    ("lastDays", last_days.to_string()),
                                    ("platform", platform),
                                ],
                            )
                            .await
                    }
                })
                .await;

            match response {
                Ok(history) => {
                    debug!(
                        platform = %platform,
                        actor = %actor.email,
                        posts = history.history.len(),
                        "Fetched recent posts"
                    );
                    result.posts.extend(history.history.into_iter().map(|p| Post {
                        id: p.id,
                        platform: platform.clone(),
                        post_ids: p.post_ids,
                    }));
                }
                Err(e) => {
                    warn!(platform = %platform, error = %e, "History fetch failed, continuing with remaining platforms");
                    result.errors.push(PlatformSyncError {
                        platform: platform.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        result
    }

    /// List the comments under a post, filtered per platform and tagged with
    /// the post id they were listed under.
    pub async fn list_comments(
        &self,
        post: &Post,
        actor: &Actor,
    ) -> Result<Vec<Comment>, GatewayError> {
        let path = format!("/comments/{}", post.id);
        let client = Arc::clone(&self.client);

        let body: serde_json::Value = self
            .platform_call(&post.platform, move || {
                let client = Arc::clone(&client);
                let path = path.clone();
                async move { client.get_json::<serde_json::Value>(&path, &[]).await }
            })
            .await?;

        let mut comments = Vec::new();
        if let Some(map) = body.as_object() {
            for (key, value) in map {
                if !value.is_array() {
                    continue;
                }
                match serde_json::from_value::<Vec<Comment>>(value.clone()) {
                    Ok(batch) => comments.extend(batch),
                    Err(e) => {
                        warn!(platform = %key, error = %e, "Skipping unparseable comment batch")
                    }
                }
            }
        }

        let mut comments = filter_platform_comments(&post.platform, post, comments);
        for comment in &mut comments {
            comment.api_post_id = Some(post.id.clone());
        }

        debug!(
            post_id = %post.id,
            platform = %post.platform,
            actor = %actor.email,
            comments = comments.len(),
            "Listed comments"
        );

        Ok(comments)
    }

    /// Send a reply to the comment behind a mention.
    ///
    /// On success the caller is responsible for creating the child mention
    /// inside its own store transaction.
    pub async fn reply_to_comment(
        &self,
        mention: &Mention,
        content: &str,
        actor: &Actor,
    ) -> Result<ReplyResult, GatewayError> {
        let path = format!("/comments/{}/reply", mention.social_media_platform_ref);
        let body = serde_json::json!({
            "comment": content,
            "platforms": [mention.platform],
            "searchPlatformId": true,
        });
        let client = Arc::clone(&self.client);

        let raw: serde_json::Value = self
            .platform_call(&mention.platform, move || {
                let client = Arc::clone(&client);
                let path = path.clone();
                let body = body.clone();
                async move { client.post_json::<serde_json::Value>(&path, &body).await }
            })
            .await?;

        debug!(
            mention_id = mention.id,
            platform = %mention.platform,
            actor = %actor.email,
            "Reply submitted upstream"
        );

        Ok(ReplyResult::from_raw(raw, &mention.platform))
    }

    /// Aggregate the persisted circuit states into a health snapshot.
    pub async fn health_snapshot(&self) -> anyhow::Result<HealthSnapshot> {
        let mut rows = self.breakers.store().load_all().await?;
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let circuits: Vec<CircuitHealth> = rows
            .into_iter()
            .map(|(platform, snapshot)| CircuitHealth {
                healthy: snapshot.state == CircuitState::Closed,
                state: snapshot.state,
                platform,
            })
            .collect();

        let status = if circuits.iter().all(|c| c.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Ok(HealthSnapshot { status, circuits })
    }
}

/// Platform comment filter. Identity for most platforms; for twitter only
/// top-level comments survive: a comment that references other tweets is a
/// threaded reply unless it references this post's own tweet id.
fn filter_platform_comments(platform: &str, post: &Post, comments: Vec<Comment>) -> Vec<Comment> {
    if platform != "twitter" {
        return comments;
    }

    let post_tweet_id = twitter_post_id(post);
    comments
        .into_iter()
        .filter(|c| {
            c.referenced_tweets.is_empty()
                || post_tweet_id
                    .as_deref()
                    .map(|id| c.referenced_tweets.iter().any(|r| r.id == id))
                    .unwrap_or(false)
        })
        .collect()
}

/// The twitter-side id of a post, derived from its aggregator `postIds`
/// entries (`"twitter:<id>"`, falling back to the first entry).
fn twitter_post_id(post: &Post) -> Option<String> {
    post.post_ids
        .iter()
        .find_map(|entry| match entry.split_once(':') {
            Some((prefix, id)) if prefix.eq_ignore_ascii_case("twitter") => Some(id.to_string()),
            _ => None,
        })
        .or_else(|| post.post_ids.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{
        BreakerSnapshot, CircuitBreakerConfig, InMemoryBreakerStateStore,
    };
    use crate::clock::{Clock, InstantSleeper, ManualClock};
    use crate::http::HttpClientConfig;
    use crate::retry::RetryPolicyConfig;
    use chrono::Utc;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn actor() -> Actor {
        Actor::new(1, "ops@example.com")
    }

    fn comment(id: &str, refs: &[&str]) -> Comment {
        Comment {
            comment_id: id.to_string(),
            comment: "text".to_string(),
            platform: "twitter".to_string(),
            referenced_tweets: refs
                .iter()
                .map(|r| ReferencedTweet {
                    id: r.to_string(),
                    kind: Some("replied_to".to_string()),
                })
                .collect(),
            api_post_id: None,
        }
    }

    fn twitter_post() -> Post {
        Post {
            id: "p1".to_string(),
            platform: "twitter".to_string(),
            post_ids: vec!["twitter:111".to_string(), "facebook:999".to_string()],
        }
    }

    struct TestGateway {
        gateway: SocialGateway,
        store: Arc<InMemoryBreakerStateStore>,
        clock: ManualClock,
    }

    fn build_gateway(
        server_uri: &str,
        platforms: Vec<&str>,
        max_failures: u32,
        max_retries: usize,
    ) -> TestGateway {
        let client = Arc::new(
            AggregatorClient::new(HttpClientConfig {
                base_url: server_uri.to_string(),
                api_key: "k".to_string(),
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(2),
            })
            .unwrap(),
        );
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let registry = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig {
                max_failures,
                reset_timeout: Duration::from_secs(1),
            },
            Arc::new(clock.clone()),
            Arc::clone(&store) as Arc<dyn crate::breaker::BreakerStateStore>,
        ));
        let retry = RetryPolicy::new(RetryPolicyConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        })
        .with_sleeper(Arc::new(InstantSleeper));
        let gateway = SocialGateway::new(
            client,
            registry,
            retry,
            SocialGatewayConfig {
                platforms: platforms.into_iter().map(String::from).collect(),
                history_last_days: 7,
            },
        );
        TestGateway { gateway, store, clock }
    }

    #[test]
    fn test_twitter_filter_keeps_top_level_comments() {
        let post = twitter_post();
        let comments = vec![
            comment("c1", &[]),
            comment("c2", &["111"]),
            comment("c3", &["222"]),
        ];
        let filtered = filter_platform_comments("twitter", &post, comments);
        let ids: Vec<&str> = filtered.iter().map(|c| c.comment_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_non_twitter_filter_is_identity() {
        let mut post = twitter_post();
        post.platform = "bluesky".to_string();
        let comments = vec![comment("c1", &["anything"])];
        let filtered = filter_platform_comments("bluesky", &post, comments);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_reply_result_parsing() {
        let raw = serde_json::json!({
            "success": true,
            "bluesky": { "comment": "hello back", "commentId": "bsky-77" }
        });
        let result = ReplyResult::from_raw(raw, "bluesky");
        assert!(result.is_success());
        assert_eq!(result.content.as_deref(), Some("hello back"));
        assert_eq!(result.platform_ref.as_deref(), Some("bsky-77"));

        let raw = serde_json::json!({ "success": false });
        let result = ReplyResult::from_raw(raw, "bluesky");
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_list_recent_posts_continues_on_platform_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(query_param("platform", "bluesky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [{ "id": "p1", "postIds": ["bluesky:1"] }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .and(query_param("platform", "twitter"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let t = build_gateway(&server.uri(), vec!["bluesky", "twitter"], 5, 0);
        let result = t.gateway.list_recent_posts(&actor()).await;

        assert_eq!(result.posts.len(), 1);
        assert_eq!(result.posts[0].platform, "bluesky");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].platform, "twitter");
    }

    #[tokio::test]
    async fn test_list_comments_flattens_and_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/comments/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bluesky": [
                    { "commentId": "c1", "comment": "hi", "platform": "bluesky" }
                ]
            })))
            .mount(&server)
            .await;

        let t = build_gateway(&server.uri(), vec!["bluesky"], 5, 0);
        let post = Post {
            id: "p1".to_string(),
            platform: "bluesky".to_string(),
            post_ids: vec![],
        };
        let comments = t.gateway.list_comments(&post, &actor()).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].api_post_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_breaker_opens_then_recovers_through_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": []
            })))
            .mount(&server)
            .await;

        let t = build_gateway(&server.uri(), vec!["bluesky"], 3, 5);

        // Three attempts, then the opened breaker stops the retry loop
        let sweep = t.gateway.list_recent_posts(&actor()).await;
        assert_eq!(sweep.posts.len(), 0);
        assert_eq!(sweep.errors.len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        // While open the upstream is not touched at all
        let sweep = t.gateway.list_recent_posts(&actor()).await;
        assert_eq!(sweep.errors.len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        // After the reset window the probe succeeds and the circuit closes
        t.clock.advance(Duration::from_secs(2));
        let sweep = t.gateway.list_recent_posts(&actor()).await;
        assert!(sweep.errors.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 4);

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let persisted = t.store.get("bluesky").unwrap();
        assert_eq!(persisted.state, CircuitState::Closed);
        assert_eq!(persisted.failures, 0);
    }

    #[tokio::test]
    async fn test_health_snapshot_aggregates_circuits() {
        let server = MockServer::start().await;
        let t = build_gateway(&server.uri(), vec!["twitter", "facebook"], 5, 0);

        let now = Utc::now();
        t.store.put(
            "twitter",
            BreakerSnapshot {
                state: CircuitState::Open,
                failures: 5,
                last_failure_time: Some(now),
                next_attempt_time: Some(now),
                timestamp: now,
            },
        );
        t.store.put(
            "facebook",
            BreakerSnapshot {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: None,
                next_attempt_time: None,
                timestamp: now,
            },
        );

        let snapshot = t.gateway.health_snapshot().await.unwrap();
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.circuits.len(), 2);
        let twitter = snapshot
            .circuits
            .iter()
            .find(|c| c.platform == "twitter")
            .unwrap();
        assert!(!twitter.healthy);
        let facebook = snapshot
            .circuits
            .iter()
            .find(|c| c.platform == "facebook")
            .unwrap();
        assert!(facebook.healthy);
    }

    #[tokio::test]
    async fn test_retry_honors_open_breaker_without_sleeping() {
        use crate::clock::TrackingSleeper;

        let server = MockServer::start().await;
        let client = Arc::new(
            AggregatorClient::new(HttpClientConfig {
                base_url: server.uri(),
                api_key: "k".to_string(),
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(2),
            })
            .unwrap(),
        );
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        store.put(
            "bluesky",
            BreakerSnapshot {
                state: CircuitState::Open,
                failures: 5,
                last_failure_time: Some(now),
                next_attempt_time: Some(now + chrono::Duration::seconds(60)),
                timestamp: now,
            },
        );
        let registry = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(clock),
            store,
        ));
        let sleeper = Arc::new(TrackingSleeper::new());
        let retry = RetryPolicy::new(RetryPolicyConfig {
            max_retries: 5,
            ..Default::default()
        })
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn crate::clock::Sleeper>);
        let gateway = SocialGateway::new(
            client,
            registry,
            retry,
            SocialGatewayConfig {
                platforms: vec!["bluesky".to_string()],
                history_last_days: 7,
            },
        );

        let sweep = gateway.list_recent_posts(&actor()).await;
        assert_eq!(sweep.errors.len(), 1);
        assert!(sweep.errors[0].message.contains("OPEN"));
        // No HTTP attempts, no sleeps
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
        assert_eq!(sleeper.calls(), 0);
    }
}
