//! Bounded retry around a single LLM call
//!
//! Per call: PENDING → CALLING → { SUCCESS | RETRYABLE_FAILURE → CALLING |
//! FATAL_FAILURE }. Only failures whose [`FailureKind`](crate::llm::FailureKind) is retryable are
//! retried, with `base_delay * 2^(attempt-1)` between attempts. The attempt
//! counter lives on the stack of one `invoke` call.

use crate::agents::{AgentKind, AgentStepResult, StepOutcome};
use crate::config::RetryConfig;
use crate::llm::{estimate_tokens, LlmClient, LlmError, PromptSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How many times to call and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait after the failed `attempt` (1-based): base, 2×base, 4×base, …
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }
}

/// Emitted before every call to the collaborator
#[derive(Debug, Clone)]
pub struct AttemptStart<'a> {
    pub agent: AgentKind,
    pub unit_id: Option<&'a str>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub prompt_tokens: usize,
}

/// Emitted after every call, successful or not
#[derive(Debug, Clone)]
pub struct AttemptEnd<'a> {
    pub agent: AgentKind,
    pub unit_id: Option<&'a str>,
    pub attempt: u32,
    pub duration: Duration,
    pub success: bool,
    pub output_tokens: usize,
    pub error: Option<&'a LlmError>,
    /// A failure that will be followed by another attempt
    pub will_retry: bool,
}

/// Side channel for attempt events; the invoker keeps no log state itself
pub trait InvocationObserver: Send + Sync {
    fn on_attempt_start(&self, event: &AttemptStart<'_>);
    fn on_attempt_end(&self, event: &AttemptEnd<'_>);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl InvocationObserver for NoopObserver {
    fn on_attempt_start(&self, _event: &AttemptStart<'_>) {}
    fn on_attempt_end(&self, _event: &AttemptEnd<'_>) {}
}

/// Successful call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub attempts: u32,
    /// Wall time including backoff sleeps
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    #[error("invocation failed after {attempts_made} attempt(s): {last_error}")]
    Failed {
        last_error: LlmError,
        attempts_made: u32,
    },

    #[error("invocation cancelled after {attempts_made} attempt(s)")]
    Cancelled { attempts_made: u32 },
}

impl InvocationError {
    pub fn attempts_made(&self) -> u32 {
        match self {
            InvocationError::Failed { attempts_made, .. }
            | InvocationError::Cancelled { attempts_made } => *attempts_made,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvocationError::Cancelled { .. })
    }
}

/// Wraps an [`LlmClient`] with the retry policy, observer and cancellation
#[derive(Clone)]
pub struct RetryingInvoker {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    observer: Arc<dyn InvocationObserver>,
    cancel: CancellationToken,
}

impl RetryingInvoker {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Call the collaborator until it succeeds, fails fatally, runs out of
    /// attempts or the run is cancelled.
    pub async fn invoke(&self, prompt: &PromptSpec) -> Result<Invocation, InvocationError> {
        let started = Instant::now();
        let unit_id = prompt.unit_id.as_deref();
        let prompt_tokens = prompt.estimated_tokens();
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(InvocationError::Cancelled {
                    attempts_made: attempt,
                });
            }

            attempt += 1;
            self.observer.on_attempt_start(&AttemptStart {
                agent: prompt.agent,
                unit_id,
                attempt,
                max_attempts: self.policy.max_attempts,
                prompt_tokens,
            });

            let call_started = Instant::now();
            match self.client.complete(prompt).await {
                Ok(text) => {
                    self.observer.on_attempt_end(&AttemptEnd {
                        agent: prompt.agent,
                        unit_id,
                        attempt,
                        duration: call_started.elapsed(),
                        success: true,
                        output_tokens: estimate_tokens(&text),
                        error: None,
                        will_retry: false,
                    });
                    return Ok(Invocation {
                        text,
                        attempts: attempt,
                        duration: started.elapsed(),
                    });
                }
                Err(error) => {
                    let will_retry = error.is_retryable() && attempt < self.policy.max_attempts;
                    self.observer.on_attempt_end(&AttemptEnd {
                        agent: prompt.agent,
                        unit_id,
                        attempt,
                        duration: call_started.elapsed(),
                        success: false,
                        output_tokens: 0,
                        error: Some(&error),
                        will_retry,
                    });

                    if !will_retry {
                        return Err(InvocationError::Failed {
                            last_error: error,
                            attempts_made: attempt,
                        });
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return Err(InvocationError::Cancelled {
                    attempts_made: attempt,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(InvocationError::Cancelled {
                        attempts_made: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// [`invoke`](Self::invoke) and record the outcome as an [`AgentStepResult`]
    pub async fn execute_step(&self, prompt: &PromptSpec) -> StepOutcome {
        let started = Instant::now();
        let outcome = self.invoke(prompt).await;
        let prompt_tokens = prompt.estimated_tokens();

        let step = match &outcome {
            Ok(invocation) => AgentStepResult {
                agent: prompt.agent,
                unit_id: prompt.unit_id.clone(),
                raw_output: invocation.text.clone(),
                success: true,
                error: None,
                duration_ms: invocation.duration.as_millis() as u64,
                attempts: invocation.attempts,
                tokens_estimate: prompt_tokens + estimate_tokens(&invocation.text),
            },
            Err(error) => AgentStepResult {
                agent: prompt.agent,
                unit_id: prompt.unit_id.clone(),
                raw_output: String::new(),
                success: false,
                error: Some(error.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                attempts: error.attempts_made(),
                tokens_estimate: prompt_tokens,
            },
        };

        StepOutcome {
            step,
            outcome: outcome.map(|invocation| invocation.text),
        }
    }
}
