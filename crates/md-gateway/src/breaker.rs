//! Per-key circuit breaker with persisted state
//!
//! Each upstream platform gets its own breaker. The in-memory state is
//! authoritative within a process; every transition (and every in-CLOSED
//! failure increment) is upserted to the store fire-and-forget so that a
//! fresh process resumes the outage decision instead of re-discovering it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::GatewayError;

/// Circuit name used for calls not associated with a platform.
pub const DEFAULT_CIRCUIT: &str = "default";

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting calls until the reset timeout elapses
    Open,
    /// One probe allowed to decide between Closed and Open
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time view of a breaker, also the persisted `state_data` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    /// When this snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Persistence seam for breaker state. One row per circuit, upsert on write.
#[async_trait]
pub trait BreakerStateStore: Send + Sync {
    async fn load(&self, circuit_name: &str) -> anyhow::Result<Option<BreakerSnapshot>>;
    async fn save(&self, circuit_name: &str, snapshot: &BreakerSnapshot) -> anyhow::Result<()>;
    async fn load_all(&self) -> anyhow::Result<Vec<(String, BreakerSnapshot)>>;
}

/// In-memory store for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryBreakerStateStore {
    states: Mutex<HashMap<String, BreakerSnapshot>>,
}

impl InMemoryBreakerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, circuit_name: &str) -> Option<BreakerSnapshot> {
        self.states.lock().get(circuit_name).cloned()
    }

    pub fn put(&self, circuit_name: &str, snapshot: BreakerSnapshot) {
        self.states.lock().insert(circuit_name.to_string(), snapshot);
    }
}

#[async_trait]
impl BreakerStateStore for InMemoryBreakerStateStore {
    async fn load(&self, circuit_name: &str) -> anyhow::Result<Option<BreakerSnapshot>> {
        Ok(self.states.lock().get(circuit_name).cloned())
    }

    async fn save(&self, circuit_name: &str, snapshot: &BreakerSnapshot) -> anyhow::Result<()> {
        self.states
            .lock()
            .insert(circuit_name.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<(String, BreakerSnapshot)>> {
        Ok(self
            .states
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Observability hook invoked on every state transition.
pub type StateChangeHook = Arc<dyn Fn(&str, CircuitState, &BreakerSnapshot) + Send + Sync>;

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub max_failures: u32,
    /// Time before an open circuit permits a probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn from_snapshot(snapshot: &BreakerSnapshot) -> Self {
        Self {
            state: snapshot.state,
            failures: snapshot.failures,
            last_failure_time: snapshot.last_failure_time,
            next_attempt_time: snapshot.next_attempt_time,
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failures: self.failures,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
            timestamp: now,
        }
    }
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn BreakerStateStore>,
    inner: Mutex<BreakerInner>,
    on_state_change: Option<StateChangeHook>,
}

impl CircuitBreaker {
    /// Create a breaker for `name`, resuming from persisted state when present.
    pub async fn load(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn BreakerStateStore>,
        on_state_change: Option<StateChangeHook>,
    ) -> Self {
        let name = name.into();
        let inner = match store.load(&name).await {
            Ok(Some(snapshot)) => {
                debug!(
                    circuit = %name,
                    state = %snapshot.state,
                    failures = snapshot.failures,
                    "Resumed circuit breaker from persisted state"
                );
                BreakerInner::from_snapshot(&snapshot)
            }
            Ok(None) => BreakerInner::default(),
            Err(e) => {
                error!(circuit = %name, error = %e, "Failed to load circuit breaker state, starting CLOSED");
                BreakerInner::default()
            }
        };

        Self {
            name,
            config,
            clock,
            store,
            inner: Mutex::new(inner),
            on_state_change,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, read without triggering a transition.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `op` through the breaker.
    ///
    /// While open and before the reset timeout, `op` is never invoked and the
    /// caller gets a rejection error immediately. Once the timeout elapses a
    /// single probe is permitted; its outcome decides the next state.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        // Gate before touching the wire
        {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Open {
                let now = self.clock.now();
                match inner.next_attempt_time {
                    Some(next) if now < next => {
                        let retry_in_secs = (next - now).num_seconds().max(1);
                        metrics::counter!("breaker.rejected_total", "circuit" => self.name.clone())
                            .increment(1);
                        return Err(GatewayError::CircuitOpen {
                            circuit: self.name.clone(),
                            retry_in_secs,
                        });
                    }
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        let snapshot = inner.snapshot(now);
                        drop(inner);
                        info!(circuit = %self.name, "Circuit HALF_OPEN, permitting probe");
                        self.persist(&snapshot);
                        self.notify(CircuitState::HalfOpen, &snapshot);
                    }
                }
            }
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => Err(self.on_failure(e)),
        }
    }

    fn on_success(&self) {
        let now = self.clock.now();
        let (snapshot, transitioned, had_failures) = {
            let mut inner = self.inner.lock();
            let transitioned = inner.state != CircuitState::Closed;
            let had_failures = inner.failures > 0;
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.last_failure_time = None;
            inner.next_attempt_time = None;
            (inner.snapshot(now), transitioned, had_failures)
        };

        if transitioned {
            info!(circuit = %self.name, failures = 0, "Circuit CLOSED");
        }
        if transitioned || had_failures {
            self.persist(&snapshot);
        }
        if transitioned {
            self.notify(CircuitState::Closed, &snapshot);
        }
    }

    fn on_failure(&self, error: GatewayError) -> GatewayError {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed, re-open the window
                inner.state = CircuitState::Open;
                inner.next_attempt_time =
                    Some(now + chrono_duration(self.config.reset_timeout));
                let snapshot = inner.snapshot(now);
                drop(inner);
                warn!(circuit = %self.name, "Probe failed, circuit OPEN again");
                self.persist(&snapshot);
                self.notify(CircuitState::Open, &snapshot);
                error
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    inner.next_attempt_time =
                        Some(now + chrono_duration(self.config.reset_timeout));
                    let failures = inner.failures;
                    let snapshot = inner.snapshot(now);
                    drop(inner);
                    warn!(
                        circuit = %self.name,
                        failures = failures,
                        "Circuit OPEN"
                    );
                    metrics::counter!("breaker.opened_total", "circuit" => self.name.clone())
                        .increment(1);
                    self.persist(&snapshot);
                    self.notify(CircuitState::Open, &snapshot);
                    GatewayError::CircuitTripped {
                        circuit: self.name.clone(),
                        failures,
                        source: Box::new(error),
                    }
                } else {
                    let snapshot = inner.snapshot(now);
                    drop(inner);
                    self.persist(&snapshot);
                    error
                }
            }
            CircuitState::Open => error,
        }
    }

    /// Fire-and-forget persistence: the call path never awaits the write.
    fn persist(&self, snapshot: &BreakerSnapshot) {
        let store = Arc::clone(&self.store);
        let name = self.name.clone();
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&name, &snapshot).await {
                error!(circuit = %name, error = %e, "Failed to persist circuit breaker state");
            }
        });
    }

    fn notify(&self, state: CircuitState, snapshot: &BreakerSnapshot) {
        if let Some(hook) = &self.on_state_change {
            hook(&self.name, state, snapshot);
        }
    }
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::seconds(60))
}

/// Registry handing out one breaker per circuit name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn BreakerStateStore>,
    on_state_change: Option<StateChangeHook>,
    breakers: tokio::sync::RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn BreakerStateStore>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            on_state_change: None,
            breakers: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn with_state_change_hook(mut self, hook: StateChangeHook) -> Self {
        self.on_state_change = Some(hook);
        self
    }

    /// The backing store, shared with health reads.
    pub fn store(&self) -> Arc<dyn BreakerStateStore> {
        Arc::clone(&self.store)
    }

    /// Get or create the breaker for a circuit, loading persisted state on
    /// first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(
            CircuitBreaker::load(
                name,
                self.config.clone(),
                Arc::clone(&self.clock),
                Arc::clone(&self.store),
                self.on_state_change.clone(),
            )
            .await,
        );
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(max_failures: u32, reset_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures,
            reset_timeout: Duration::from_secs(reset_secs),
        }
    }

    async fn breaker_with(
        store: Arc<InMemoryBreakerStateStore>,
        clock: ManualClock,
        config: CircuitBreakerConfig,
    ) -> CircuitBreaker {
        CircuitBreaker::load("twitter", config, Arc::new(clock), store, None).await
    }

    async fn settle() {
        // Let fire-and-forget persistence tasks run
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_max_failures() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let breaker = breaker_with(Arc::clone(&store), clock, test_config(3, 60)).await;

        for i in 0..3 {
            let result = breaker
                .execute(|| async { Err::<(), _>(GatewayError::Server { status: 500 }) })
                .await;
            assert!(result.is_err());
            if i < 2 {
                assert_eq!(breaker.current_state(), CircuitState::Closed);
            }
        }

        assert_eq!(breaker.current_state(), CircuitState::Open);

        // Fourth call is rejected without invoking the operation
        let invoked = AtomicU32::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(())
            })
            .await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trip_wraps_original_error() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let breaker = breaker_with(store, clock, test_config(1, 60)).await;

        let result = breaker
            .execute(|| async { Err::<(), _>(GatewayError::Throttled) })
            .await;
        match result {
            Err(GatewayError::CircuitTripped { failures, source, .. }) => {
                assert_eq!(failures, 1);
                assert!(matches!(*source, GatewayError::Throttled));
            }
            other => panic!("expected CircuitTripped, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_cycle_closed_open_half_open_closed() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let breaker =
            breaker_with(Arc::clone(&store), clock.clone(), test_config(3, 1)).await;

        for _ in 0..3 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(GatewayError::Server { status: 503 }) })
                .await;
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // Before the window elapses the probe is not permitted
        let rejected = breaker.execute(|| async { Ok::<_, GatewayError>(()) }).await;
        assert!(matches!(rejected, Err(GatewayError::CircuitOpen { .. })));

        // After the window a successful probe closes the circuit
        clock.advance(Duration::from_secs(2));
        let result = breaker.execute(|| async { Ok::<_, GatewayError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        settle().await;
        let persisted = store.get("twitter").expect("state persisted");
        assert_eq!(persisted.state, CircuitState::Closed);
        assert_eq!(persisted.failures, 0);
        assert!(persisted.last_failure_time.is_none());
        assert!(persisted.next_attempt_time.is_none());
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let breaker =
            breaker_with(Arc::clone(&store), clock.clone(), test_config(1, 1)).await;

        let _ = breaker
            .execute(|| async { Err::<(), _>(GatewayError::Server { status: 500 }) })
            .await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        clock.advance(Duration::from_secs(2));
        let result = breaker
            .execute(|| async { Err::<(), _>(GatewayError::Server { status: 500 }) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.current_state(), CircuitState::Open);

        settle().await;
        let persisted = store.get("twitter").unwrap();
        assert_eq!(persisted.state, CircuitState::Open);
        assert!(persisted.next_attempt_time.unwrap() > clock.now() - ChronoDuration::seconds(2));
    }

    #[tokio::test]
    async fn test_open_next_attempt_is_in_the_future() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let breaker =
            breaker_with(Arc::clone(&store), clock.clone(), test_config(1, 60)).await;

        let _ = breaker
            .execute(|| async { Err::<(), _>(GatewayError::Network("reset".into())) })
            .await;

        settle().await;
        let persisted = store.get("twitter").unwrap();
        assert_eq!(persisted.state, CircuitState::Open);
        assert!(persisted.next_attempt_time.unwrap() > clock.now());
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_state() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        store.put(
            "twitter",
            BreakerSnapshot {
                state: CircuitState::Open,
                failures: 5,
                last_failure_time: Some(clock.now()),
                next_attempt_time: Some(clock.now() + ChronoDuration::seconds(60)),
                timestamp: clock.now(),
            },
        );

        let breaker = breaker_with(store, clock, test_config(5, 60)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        let result = breaker.execute(|| async { Ok::<_, GatewayError>(()) }).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_state_change_hook_fires() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let clock = ManualClock::new(Utc::now());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let hook: StateChangeHook = Arc::new(move |_name, state, _snap| {
            hook_seen.lock().push(state);
        });

        let breaker = CircuitBreaker::load(
            "twitter",
            test_config(1, 1),
            Arc::new(clock.clone()),
            store,
            Some(hook),
        )
        .await;

        let _ = breaker
            .execute(|| async { Err::<(), _>(GatewayError::Server { status: 500 }) })
            .await;
        clock.advance(Duration::from_secs(2));
        let _ = breaker.execute(|| async { Ok::<_, GatewayError>(()) }).await;

        let states = seen.lock().clone();
        assert_eq!(
            states,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance() {
        let store = Arc::new(InMemoryBreakerStateStore::new());
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            store,
        );

        let a = registry.get_or_create("twitter").await;
        let b = registry.get_or_create("twitter").await;
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get_or_create(DEFAULT_CIRCUIT).await;
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
