//! Background task recovery loops
//!
//! One loop per task code. Each activation picks up unfinished tasks whose
//! `started_at` is still inside the code's window and re-processes them;
//! anything older is abandoned. Loops are not cancellable; they end when the
//! store rejects all queries at process shutdown.

use std::sync::Arc;
use std::time::Duration;

use md_common::TaskCode;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::MentionEngine;

/// Configuration for one recovery loop.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Task code this loop recovers
    pub code: TaskCode,
    /// How often to check. Default: 60 seconds.
    pub check_interval: Duration,
    /// Whether the loop runs at all
    pub enabled: bool,
}

impl RecoveryConfig {
    pub fn for_code(code: TaskCode) -> Self {
        Self {
            code,
            check_interval: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Background task that re-processes unfinished outbox tasks.
pub struct RecoveryTask {
    engine: Arc<MentionEngine>,
    config: RecoveryConfig,
}

impl RecoveryTask {
    pub fn new(engine: Arc<MentionEngine>, config: RecoveryConfig) -> Self {
        Self { engine, config }
    }

    /// Run indefinitely. An immediate pass happens on startup, then one per
    /// tick.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!(code = %self.config.code, "Recovery loop disabled");
            return;
        }

        info!(
            code = %self.config.code,
            interval_secs = self.config.check_interval.as_secs(),
            "Starting recovery loop"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.recover_once().await;
        }
    }

    /// Perform a single recovery pass.
    pub async fn recover_once(&self) {
        match self.engine.recover_once(self.config.code).await {
            Ok(0) => debug!(code = %self.config.code, "No tasks to recover"),
            Ok(count) => {
                info!(code = %self.config.code, count = count, "Recovered tasks");
                metrics::counter!("engine.recovery.processed_total").increment(count as u64);
            }
            Err(e) => {
                error!(code = %self.config.code, error = %e, "Recovery pass failed");
            }
        }
    }
}

/// Spawn the two standard loops (reply and comment-fetch recovery).
pub fn spawn_recovery_loops(engine: &Arc<MentionEngine>) -> Vec<tokio::task::JoinHandle<()>> {
    [TaskCode::ReplyMention, TaskCode::FetchComments]
        .into_iter()
        .map(|code| {
            let task = RecoveryTask::new(Arc::clone(engine), RecoveryConfig::for_code(code));
            tokio::spawn(async move { task.run().await })
        })
        .collect()
}
