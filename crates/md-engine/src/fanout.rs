//! Bounded fan-out helper
//!
//! Processes entities in submission order with at most `limit` operations in
//! flight, batch by batch. `break_on_error = true` aborts the traversal on
//! the first failure; otherwise each failure is routed to `on_error` and the
//! traversal continues. An optional inter-batch delay throttles hot loops.

use std::time::Duration;

/// Fan-out configuration
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Maximum operations in flight
    pub limit: usize,
    /// Optional pause between batches
    pub batch_delay: Option<Duration>,
    /// Abort the whole traversal on first failure
    pub break_on_error: bool,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            batch_delay: None,
            break_on_error: false,
        }
    }
}

impl FanOutConfig {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            ..Self::default()
        }
    }
}

/// Run `op` over `items` in bounded batches, accumulating successes.
pub async fn process_batched<T, R, E, F, Fut, H>(
    items: Vec<T>,
    config: &FanOutConfig,
    op: F,
    mut on_error: H,
) -> Result<Vec<R>, E>
where
    F: Fn(T) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    H: FnMut(usize, E),
{
    let limit = config.limit.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut iter = items.into_iter();
    let mut index = 0usize;

    loop {
        let batch: Vec<T> = iter.by_ref().take(limit).collect();
        if batch.is_empty() {
            break;
        }

        let outcomes = futures::future::join_all(batch.into_iter().map(&op)).await;
        for outcome in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    if config.break_on_error {
                        return Err(e);
                    }
                    on_error(index, e);
                }
            }
            index += 1;
        }

        if index < total {
            if let Some(delay) = config.batch_delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Ok(results)
}
