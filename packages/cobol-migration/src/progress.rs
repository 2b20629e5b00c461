//! Progress reporting and per-run invocation statistics

use crate::invoker::{AttemptEnd, AttemptStart, InvocationObserver};
use crate::run::Stage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Receives `(stage, current, total)` after every processed unit.
///
/// Synchronous and fire-and-forget: the pipeline does not wait on it.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, stage: Stage, current: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(Stage, usize, usize) + Send + Sync,
{
    fn on_progress(&self, stage: Stage, current: usize, total: usize) {
        self(stage, current, total)
    }
}

/// Discards all progress
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _stage: Stage, _current: usize, _total: usize) {}
}

/// Logs progress at info level
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, stage: Stage, current: usize, total: usize) {
        info!("Stage {}: {}/{}", stage, current, total);
    }
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationStats {
    /// Attempts made, retries included
    pub calls: u32,
    pub successes: u32,
    pub failures: u32,
    /// Attempts after the first one of a call
    pub retries: u32,
    pub total_duration_ms: u64,
    /// Prompt plus output, 4 characters per token
    pub tokens_estimate: usize,
}

/// Invocation observer owned by a single run: logs each attempt and keeps
/// the run's counters.
#[derive(Default)]
pub struct RunObserver {
    stats: Mutex<InvocationStats>,
}

impl RunObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> InvocationStats {
        self.stats.lock().clone()
    }
}

impl InvocationObserver for RunObserver {
    fn on_attempt_start(&self, event: &AttemptStart<'_>) {
        debug!(
            "Agent {} [{}]: attempt {}/{} (~{} prompt tokens)",
            event.agent,
            event.unit_id.unwrap_or("-"),
            event.attempt,
            event.max_attempts,
            event.prompt_tokens
        );

        let mut stats = self.stats.lock();
        stats.calls += 1;
        if event.attempt > 1 {
            stats.retries += 1;
        }
        stats.tokens_estimate += event.prompt_tokens;
    }

    fn on_attempt_end(&self, event: &AttemptEnd<'_>) {
        let unit = event.unit_id.unwrap_or("-");
        let duration_ms = event.duration.as_millis() as u64;

        match (event.success, event.error) {
            (true, _) => info!(
                "Agent {} [{}]: completed in {}ms (attempt {})",
                event.agent, unit, duration_ms, event.attempt
            ),
            (false, Some(error)) if event.will_retry => warn!(
                "Agent {} [{}]: attempt {} failed ({}), retrying",
                event.agent, unit, event.attempt, error
            ),
            (false, error) => warn!(
                "Agent {} [{}]: failed after {} attempt(s): {}",
                event.agent,
                unit,
                event.attempt,
                error.map(|e| e.to_string()).unwrap_or_default()
            ),
        }

        let mut stats = self.stats.lock();
        if event.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_duration_ms += duration_ms;
        stats.tokens_estimate += event.output_tokens;
    }
}
