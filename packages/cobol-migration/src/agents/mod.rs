//! The three pipeline agents
//!
//! An agent is a prompt builder plus a result handler. All of them run through
//! [`run_agent`], which invokes the model with retries and hands the raw text
//! to the handler only when the call succeeded.

pub mod analysis;
pub mod insight;
pub mod transformation;

pub use analysis::AnalysisRecord;
pub use transformation::TransformationOutput;

use crate::invoker::{InvocationError, RetryingInvoker};
use crate::llm::PromptSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    DependencyInsight,
    StructuralAnalysis,
    Transformation,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::DependencyInsight => "dependency_insight",
            AgentKind::StructuralAnalysis => "structural_analysis",
            AgentKind::Transformation => "transformation",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one (agent, unit) step; only the final attempt is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStepResult {
    pub agent: AgentKind,
    pub unit_id: Option<String>,
    pub raw_output: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    /// Prompt plus output, 4 characters per token
    pub tokens_estimate: usize,
}

/// Step record plus the raw text (or why there is none)
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: AgentStepResult,
    pub outcome: Result<String, InvocationError>,
}

/// Step record plus the handler's value
#[derive(Debug, Clone)]
pub struct AgentRun<T> {
    pub step: AgentStepResult,
    pub outcome: Result<T, InvocationError>,
}

impl<T> AgentRun<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.outcome, Err(e) if e.is_cancelled())
    }
}

/// Invoke the model for `prompt` and feed successful output to `handle`
pub async fn run_agent<T, F>(invoker: &RetryingInvoker, prompt: PromptSpec, handle: F) -> AgentRun<T>
where
    F: FnOnce(&str) -> T,
{
    let StepOutcome { step, outcome } = invoker.execute_step(&prompt).await;
    let outcome = outcome.map(|text| handle(&text));
    AgentRun { step, outcome }
}
