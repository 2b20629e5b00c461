//! LLM collaborator boundary
//!
//! The pipeline never talks to a model vendor directly. Anything that can turn
//! a [`PromptSpec`] into text implements [`LlmClient`]; failures come back as a
//! closed set of [`FailureKind`]s so the retry policy never has to guess.

use crate::agents::AgentKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sampling parameters for one call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 4_096,
            temperature: 0.1,
            top_p: 0.5,
        }
    }
}

/// Everything needed for a single model call
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub agent: AgentKind,
    /// Unit the call is about (`None` for whole-graph calls)
    pub unit_id: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: GenerationOptions,
}

impl PromptSpec {
    /// Rough size of the prompt in tokens (4 characters per token)
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system_prompt) + estimate_tokens(&self.user_prompt)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Why an upstream call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Cancelled,
    ContentPolicy,
    Other,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::ContentPolicy => "content_policy",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by an [`LlmClient`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: FailureKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn content_policy(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ContentPolicy, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// For clients that only surface error text
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_failure(&message), message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Substring classifier for free-text upstream errors.
///
/// Matching is case-insensitive; anything unrecognised is `Other` (fatal).
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        FailureKind::Timeout
    } else if lower.contains("cancel") {
        FailureKind::Cancelled
    } else if lower.contains("content_filter")
        || lower.contains("content filter")
        || lower.contains("content management policy")
        || lower.contains("content policy")
        || lower.contains("safety")
    {
        FailureKind::ContentPolicy
    } else {
        FailureKind::Other
    }
}

/// Text-completion collaborator
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion for the given prompt
    async fn complete(&self, prompt: &PromptSpec) -> Result<String, LlmError>;

    /// Model identifier (for logs)
    fn model_name(&self) -> &str;
}
