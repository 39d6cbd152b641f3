//! Exponential backoff retry with jitter
//!
//! Runs an operation up to `max_retries + 1` times, sleeping
//! `min(initial_delay * factor^attempt + jitter, max_delay)` between
//! attempts with uniform jitter in [0, 1000] ms. A caller-supplied
//! predicate gates each retry; breaker rejections are surfaced to the
//! caller directly and never count toward the budget.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::GatewayError;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

/// Retry engine with pluggable sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run `op`, retrying while `should_retry` approves the failure.
    pub async fn execute<T, F, Fut, P>(&self, should_retry: P, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
        P: Fn(&GatewayError) -> bool,
    {
        for attempt in 0..=self.config.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_circuit_open() => {
                    // The call never ran; hand the rejection straight back
                    return Err(e);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        return Err(e);
                    }
                    if attempt == self.config.max_retries {
                        return Err(GatewayError::RetryExhausted {
                            attempts: attempt + 1,
                            source: Box::new(e),
                        });
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let base = self
            .config
            .initial_delay
            .mul_f64(self.config.factor.powi(attempt as i32));
        let jitter = Duration::from_millis(rand::rng().random_range(0..=1000));
        (base + jitter).min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TrackingSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy_with(sleeper: Arc<TrackingSleeper>, max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(RetryPolicyConfig {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        })
        .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = policy_with(Arc::clone(&sleeper), 3);
        let attempts = AtomicUsize::new(0);

        let result = policy
            .execute(
                |e| e.is_retryable(),
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(GatewayError::Server { status: 500 })
                        } else {
                            Ok("ok")
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.calls(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = policy_with(Arc::clone(&sleeper), 3);
        let attempts = AtomicUsize::new(0);

        let result = policy
            .execute(
                |e| e.is_retryable(),
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(GatewayError::Network("reset".into())) }
                },
            )
            .await;

        match result {
            Err(GatewayError::RetryExhausted { attempts: n, .. }) => assert_eq!(n, 4),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.calls(), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = policy_with(Arc::clone(&sleeper), 5);
        let attempts = AtomicUsize::new(0);

        let result = policy
            .execute(
                |e| e.is_retryable(),
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(GatewayError::Client { status: 400 }) }
                },
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Client { status: 400 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.calls(), 0);
    }

    #[tokio::test]
    async fn test_circuit_rejection_short_circuits() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = policy_with(Arc::clone(&sleeper), 5);
        let attempts = AtomicUsize::new(0);

        let result = policy
            .execute(
                // Even an always-retry predicate must not override the breaker
                |_| true,
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(GatewayError::CircuitOpen {
                            circuit: "twitter".into(),
                            retry_in_secs: 42,
                        })
                    }
                },
            )
            .await;

        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.calls(), 0);
    }

    #[tokio::test]
    async fn test_backoff_grows_within_jitter_bounds() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = policy_with(Arc::clone(&sleeper), 3);

        let _ = policy
            .execute(
                |e| e.is_retryable(),
                || async { Err::<(), _>(GatewayError::Server { status: 500 }) },
            )
            .await;

        assert_eq!(sleeper.calls(), 3);
        for (attempt, base_secs) in [(0usize, 1u64), (1, 2), (2, 4)] {
            let delay = sleeper.call_at(attempt).unwrap();
            let base = Duration::from_secs(base_secs);
            assert!(delay >= base, "delay {:?} below base {:?}", delay, base);
            assert!(
                delay <= base + Duration::from_millis(1000),
                "delay {:?} above jitter ceiling",
                delay
            );
        }
    }

    #[tokio::test]
    async fn test_delay_is_capped_at_max() {
        let sleeper = Arc::new(TrackingSleeper::new());
        let policy = RetryPolicy::new(RetryPolicyConfig {
            max_retries: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        })
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);

        let _ = policy
            .execute(
                |e| e.is_retryable(),
                || async { Err::<(), _>(GatewayError::Throttled) },
            )
            .await;

        for i in 0..sleeper.calls() {
            assert!(sleeper.call_at(i).unwrap() <= Duration::from_secs(5));
        }
    }
}
