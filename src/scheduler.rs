//! Periodic trigger for ingestion cycles
//!
//! Every source runs in its own task with its own interval, so a slow or
//! failing source never delays another. Each cycle is bounded by a timeout;
//! a timed-out cycle is dropped before it can advance the cursor. There is
//! no retry loop: the next tick re-reads the same range.

use crate::engine::{Engine, IngestResult};
use crate::error::CycleError;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Timing of the periodic trigger.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Time between the starts of two cycles of one source
    pub poll_interval: Duration,
    /// Longest a single cycle may take before it is abandoned
    pub cycle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(12),
            cycle_timeout: Duration::from_secs(120),
        }
    }
}

/// What happened to one scheduled cycle.
#[derive(Debug)]
pub enum TickOutcome {
    Completed(IngestResult),
    Failed(CycleError),
    TimedOut,
}

/// Run one cycle of a source under the cycle timeout, logging the outcome.
pub async fn run_tick(engine: &Engine, source_id: &str, cycle_timeout: Duration) -> TickOutcome {
    match tokio::time::timeout(cycle_timeout, engine.run_source(source_id)).await {
        Ok(Ok(result)) => {
            if result.translation_errors > 0 {
                warn!(
                    "{}: {} events could not be translated",
                    source_id, result.translation_errors
                );
            }
            TickOutcome::Completed(result)
        }
        Ok(Err(e)) => {
            if e.is_retryable() {
                warn!("{}: cycle failed, retrying next tick: {}", source_id, e);
            } else {
                error!("{}: cycle failed: {}", source_id, e);
            }
            TickOutcome::Failed(e)
        }
        Err(_) => {
            warn!(
                "{}: cycle timed out after {:?}, cursor left unchanged",
                source_id, cycle_timeout
            );
            TickOutcome::TimedOut
        }
    }
}

/// Tick one source forever.
///
/// Returns only when the source is misconfigured, since no later tick can succeed.
async fn source_loop(engine: Arc<Engine>, source_id: String, config: SchedulerConfig) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let TickOutcome::Failed(CycleError::Config { .. }) =
            run_tick(&engine, &source_id, config.cycle_timeout).await
        {
            error!("{}: stopping ingestion of misconfigured source", source_id);
            return;
        }
    }
}

/// Run every configured source on its own task until all of them stop.
///
/// Dropping the returned future aborts all source tasks.
pub async fn run_scheduler(engine: Arc<Engine>, config: SchedulerConfig) -> Result<()> {
    if engine.sources().is_empty() {
        anyhow::bail!("No event sources configured");
    }
    if config.poll_interval.is_zero() {
        anyhow::bail!("Poll interval must be greater than zero");
    }
    if config.cycle_timeout.is_zero() {
        anyhow::bail!("Cycle timeout must be greater than zero");
    }

    let mut tasks = JoinSet::new();
    for source in engine.sources() {
        info!(
            "Scheduling {} every {:?} (batch {}, lag {})",
            source.source_id, config.poll_interval, source.batch_limit, source.lag_tolerance
        );
        tasks.spawn(source_loop(engine.clone(), source.source_id.clone(), config));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Source task ended abnormally: {}", e);
        }
    }
    anyhow::bail!("All source tasks stopped")
}
