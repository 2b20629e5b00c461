/*
 * COBOL Migration - LLM agent pipeline for COBOL → Java modernization
 *
 * Architecture:
 * - Reference extraction (COPY / EXEC SQL INCLUDE / CALL)
 * - Dependency graph (forward / reverse index, metrics, cycles)
 * - Retrying invoker around a pluggable LLM client
 * - Three sequential agent stages: insight, analysis, transformation
 * - Structured-output parser for generated Java files
 */

// Public modules
pub mod agents;
pub mod artifact;
pub mod config;
pub mod dependency_graph;
pub mod error;
pub mod invoker;
pub mod llm;
pub mod orchestrator;
pub mod output_parser;
pub mod progress;
pub mod reference;
pub mod run;
pub mod source;
pub mod telemetry;

// Re-exports
pub use agents::{run_agent, AgentKind, AgentRun, AgentStepResult, AnalysisRecord, StepOutcome};
pub use artifact::{persist_artifacts, ArtifactSink, FsArtifactSink, GeneratedArtifact, PersistReport};
pub use config::{ConfigError, PipelineConfig, Validatable};
pub use dependency_graph::{detect_cycles, Adjacency, DependencyGraph, GraphMetrics, ReferenceEdge};
pub use error::{OrchestratorError, Result};
pub use invoker::{
    AttemptEnd, AttemptStart, Invocation, InvocationError, InvocationObserver, RetryPolicy,
    RetryingInvoker,
};
pub use llm::{FailureKind, GenerationOptions, LlmClient, LlmError, PromptSpec};
pub use orchestrator::{
    run_pipeline, PipelineOptions, PipelineOrchestrator, PipelineResult, UnitError, UnitErrorKind,
};
pub use output_parser::{ParseError, ParsedOutput};
pub use progress::{InvocationStats, NoopProgress, ProgressSink, RunObserver, TracingProgress};
pub use reference::{Reference, ReferenceKind};
pub use run::{PipelineRun, RunState, RunStateMachine, Stage};
pub use source::{load_units, SourceUnit};

pub use tokio_util::sync::CancellationToken;
