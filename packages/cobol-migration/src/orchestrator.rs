use crate::agents::{self, analysis, insight, run_agent, transformation, AgentStepResult, AnalysisRecord};
use crate::artifact::GeneratedArtifact;
use crate::config::{PipelineConfig, Validatable};
use crate::dependency_graph::DependencyGraph;
use crate::error::Result;
use crate::invoker::{RetryPolicy, RetryingInvoker};
use crate::llm::LlmClient;
use crate::progress::{InvocationStats, NoopProgress, ProgressSink, RunObserver};
use crate::run::{PipelineRun, RunState, RunStateMachine, Stage};
use crate::source::{ensure_unique_names, SourceUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorKind {
    /// The model call failed after retries
    Invocation,
    /// The model answered but the output could not be parsed
    Parse,
}

/// Failure scoped to one unit; the run continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitError {
    pub stage: Stage,
    pub unit_id: Option<String>,
    pub kind: UnitErrorKind,
    pub message: String,
}

/// Everything a run produced, complete or not
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub status: RunState,
    pub dependency_graph: DependencyGraph,
    pub analyses: Vec<AnalysisRecord>,
    pub artifacts: Vec<GeneratedArtifact>,
    pub step_results: Vec<AgentStepResult>,
    pub errors: Vec<UnitError>,
    pub warnings: Vec<String>,
    /// Units not transformed because their analysis failed
    pub skipped: Vec<String>,
    pub stats: InvocationStats,
    pub duration_ms: u64,
}

impl PipelineResult {
    fn new(run: &PipelineRun, dependency_graph: DependencyGraph) -> Self {
        Self {
            run_id: run.id,
            status: run.state.clone(),
            dependency_graph,
            analyses: Vec::new(),
            artifacts: Vec::new(),
            step_results: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            skipped: Vec::new(),
            stats: InvocationStats::default(),
            duration_ms: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunState::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, RunState::Cancelled { .. })
    }

    pub fn successful_analyses(&self) -> impl Iterator<Item = &AnalysisRecord> {
        self.analyses.iter().filter(|a| a.is_success())
    }

    pub fn artifacts_for<'a>(&'a self, unit_id: &'a str) -> impl Iterator<Item = &'a GeneratedArtifact> {
        self.artifacts.iter().filter(move |a| a.origin_unit == unit_id)
    }

    fn record_step(&mut self, step: AgentStepResult) {
        // Nothing was sent when cancellation won before the first attempt
        if step.attempts > 0 {
            self.step_results.push(step);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Cancelled,
}

/// Runs the three agent stages over one unit set
pub struct PipelineOrchestrator {
    client: Arc<dyn LlmClient>,
    config: PipelineConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(client: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute all stages in order. Unit-scoped failures end up in the result;
    /// cancellation returns what was accumulated so far.
    pub async fn run(&self, units: &[SourceUnit], graph: DependencyGraph) -> Result<PipelineResult> {
        let start_time = Instant::now();
        let observer = Arc::new(RunObserver::new());
        let invoker = RetryingInvoker::new(self.client.clone(), RetryPolicy::from(&self.config.retry))
            .with_observer(observer.clone())
            .with_cancellation(self.cancel.clone());

        let mut sm = RunStateMachine::new(PipelineRun::new_pending());
        let run_id = sm.run().id;
        let mut result = PipelineResult::new(sm.run(), graph);

        info!(
            "Run {}: {} units ({} programs) with model {}",
            run_id,
            units.len(),
            units.iter().filter(|u| u.is_program()).count(),
            invoker.model_name()
        );

        match self.run_stages(&invoker, &mut sm, units, &mut result).await? {
            Flow::Continue => sm.complete()?,
            Flow::Cancelled => {
                sm.cancel("cancellation requested")?;
                warn!(
                    "Run {}: cancelled during {} - {} analyses, {} artifacts kept",
                    run_id,
                    sm.run()
                        .state
                        .current_stage()
                        .map(|s| s.as_str())
                        .unwrap_or("startup"),
                    result.analyses.len(),
                    result.artifacts.len()
                );
            }
        }

        result.status = sm.into_run().state;
        result.stats = observer.snapshot();
        result.duration_ms = start_time.elapsed().as_millis() as u64;

        info!(
            "Run {} {} - {} analyses, {} artifacts, {} errors, {} calls in {}ms",
            run_id,
            result.status.state_name(),
            result.analyses.len(),
            result.artifacts.len(),
            result.errors.len(),
            result.stats.calls,
            result.duration_ms
        );

        Ok(result)
    }

    async fn run_stages(
        &self,
        invoker: &RetryingInvoker,
        sm: &mut RunStateMachine,
        units: &[SourceUnit],
        result: &mut PipelineResult,
    ) -> Result<Flow> {
        if self.cancel.is_cancelled() {
            return Ok(Flow::Cancelled);
        }

        sm.start(Stage::DependencyInsight)?;
        if self.dependency_insight(invoker, result).await == Flow::Cancelled {
            return Ok(Flow::Cancelled);
        }

        sm.advance(Stage::StructuralAnalysis)?;
        if self.structural_analysis(invoker, units, result).await == Flow::Cancelled {
            return Ok(Flow::Cancelled);
        }

        sm.advance(Stage::Transformation)?;
        Ok(self.transformation(invoker, units, result).await)
    }

    async fn dependency_insight(&self, invoker: &RetryingInvoker, result: &mut PipelineResult) -> Flow {
        info!("Stage {}: summarizing dependency graph", Stage::DependencyInsight);

        let prompt = insight::build_prompt(&result.dependency_graph, &self.config.generation.insight);
        let agent_run = run_agent(invoker, prompt, insight::handle_output).await;
        let cancelled = agent_run.is_cancelled();
        result.record_step(agent_run.step);

        match agent_run.outcome {
            Ok(text) => result.dependency_graph.set_insight(text),
            Err(_) if cancelled => return Flow::Cancelled,
            Err(e) => {
                warn!("Stage {}: continuing without insight: {}", Stage::DependencyInsight, e);
                result
                    .warnings
                    .push(format!("Dependency insight unavailable: {}", e));
            }
        }

        self.progress.on_progress(Stage::DependencyInsight, 1, 1);
        Flow::Continue
    }

    async fn structural_analysis(
        &self,
        invoker: &RetryingInvoker,
        units: &[SourceUnit],
        result: &mut PipelineResult,
    ) -> Flow {
        let programs: Vec<&SourceUnit> = units.iter().filter(|u| u.is_program()).collect();
        let total = programs.len();
        info!("Stage {}: {} programs", Stage::StructuralAnalysis, total);

        for (i, unit) in programs.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Flow::Cancelled;
            }

            let graph = &result.dependency_graph;
            let prompt = analysis::build_prompt(unit, graph, &self.config.generation.analysis);
            let agent_run = run_agent(invoker, prompt, |raw| {
                AnalysisRecord::from_output(unit, graph, raw)
            })
            .await;
            let cancelled = agent_run.is_cancelled();
            result.record_step(agent_run.step);

            match agent_run.outcome {
                Ok(record) => result.analyses.push(record),
                Err(_) if cancelled => return Flow::Cancelled,
                Err(e) => {
                    warn!("Stage {}: {} failed: {}", Stage::StructuralAnalysis, unit.name, e);
                    result.errors.push(UnitError {
                        stage: Stage::StructuralAnalysis,
                        unit_id: Some(unit.name.clone()),
                        kind: UnitErrorKind::Invocation,
                        message: e.to_string(),
                    });
                    let record = AnalysisRecord::failed(unit, &result.dependency_graph, e.to_string());
                    result.analyses.push(record);
                }
            }

            self.progress.on_progress(Stage::StructuralAnalysis, i + 1, total);
        }

        Flow::Continue
    }

    async fn transformation(
        &self,
        invoker: &RetryingInvoker,
        units: &[SourceUnit],
        result: &mut PipelineResult,
    ) -> Flow {
        let mut targets = Vec::new();
        for (idx, record) in result.analyses.iter().enumerate() {
            let Some(unit) = units.iter().find(|u| u.name == record.unit_id) else {
                continue;
            };
            if record.is_success() {
                targets.push((unit, idx));
            } else {
                result.skipped.push(unit.name.clone());
            }
        }

        let total = targets.len();
        info!(
            "Stage {}: {} programs ({} skipped)",
            Stage::Transformation,
            total,
            result.skipped.len()
        );

        for (i, (unit, idx)) in targets.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Flow::Cancelled;
            }

            let prompt = transformation::build_prompt(
                unit,
                &result.analyses[idx],
                &result.dependency_graph,
                units,
                &self.config.transformation,
                &self.config.generation.transformation,
            );
            let agent_run = run_agent(invoker, prompt, |raw| {
                transformation::handle_output(&unit.name, raw)
            })
            .await;
            let cancelled = agent_run.is_cancelled();
            result.record_step(agent_run.step);

            match agent_run.outcome {
                Ok(agents::TransformationOutput {
                    artifacts,
                    parse_error,
                }) => {
                    if let Some(e) = parse_error {
                        warn!("Stage {}: unusable output for {}: {}", Stage::Transformation, unit.name, e);
                        result.errors.push(UnitError {
                            stage: Stage::Transformation,
                            unit_id: Some(unit.name.clone()),
                            kind: UnitErrorKind::Parse,
                            message: e.to_string(),
                        });
                    }
                    result.artifacts.extend(artifacts);
                }
                Err(_) if cancelled => return Flow::Cancelled,
                Err(e) => {
                    warn!("Stage {}: {} failed: {}", Stage::Transformation, unit.name, e);
                    result.errors.push(UnitError {
                        stage: Stage::Transformation,
                        unit_id: Some(unit.name.clone()),
                        kind: UnitErrorKind::Invocation,
                        message: e.to_string(),
                    });
                }
            }

            self.progress.on_progress(Stage::Transformation, i + 1, total);
        }

        Flow::Continue
    }
}

/// Collaborators and settings for [`run_pipeline`]
#[derive(Clone, Default)]
pub struct PipelineOptions {
    pub config: PipelineConfig,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub cancel: Option<CancellationToken>,
}

/// Validate inputs, build the dependency graph and run every stage.
///
/// Only invalid configuration and duplicate unit ids are returned as errors.
pub async fn run_pipeline(
    units: &[SourceUnit],
    client: Arc<dyn LlmClient>,
    options: PipelineOptions,
) -> Result<PipelineResult> {
    options.config.validate()?;
    ensure_unique_names(units)?;

    let graph = DependencyGraph::build(units);

    let mut orchestrator = PipelineOrchestrator::new(client, options.config);
    if let Some(progress) = options.progress {
        orchestrator = orchestrator.with_progress(progress);
    }
    if let Some(cancel) = options.cancel {
        orchestrator = orchestrator.with_cancellation(cancel);
    }

    orchestrator.run(units, graph).await
}
