use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DependencyInsight,
    StructuralAnalysis,
    Transformation,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::DependencyInsight,
        Stage::StructuralAnalysis,
        Stage::Transformation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DependencyInsight => "dependency_insight",
            Stage::StructuralAnalysis => "structural_analysis",
            Stage::Transformation => "transformation",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "dependency_insight" => Ok(Stage::DependencyInsight),
            "structural_analysis" => Ok(Stage::StructuralAnalysis),
            "transformation" => Ok(Stage::Transformation),
            _ => Err(OrchestratorError::parse(format!("Invalid stage: {}", s))),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunState {
    Pending {
        created_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        current_stage: Stage,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        /// Stage that was running, `None` if cancelled before stage 1
        stage: Option<Stage>,
        reason: String,
    },
}

impl RunState {
    pub fn state_name(&self) -> &'static str {
        match self {
            RunState::Pending { .. } => "pending",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
            RunState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed { .. } | RunState::Cancelled { .. })
    }

    pub fn current_stage(&self) -> Option<Stage> {
        match self {
            RunState::Running { current_stage, .. } => Some(*current_stage),
            RunState::Cancelled { stage, .. } => *stage,
            _ => None,
        }
    }
}

/// One pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new_pending() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: RunState::Pending { created_at: now },
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new_pending()
    }
}

/// Run state machine for transitions
pub struct RunStateMachine {
    run: PipelineRun,
}

impl RunStateMachine {
    pub fn new(run: PipelineRun) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn into_run(self) -> PipelineRun {
        self.run
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.run.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: PENDING → RUNNING
    pub fn start(&mut self, stage: Stage) -> Result<()> {
        match &self.run.state {
            RunState::Pending { .. } => {
                let now = Utc::now();
                self.run.state = RunState::Running {
                    started_at: now,
                    current_stage: stage,
                };
                self.run.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Move a running run to a later stage; stages never repeat or go back
    pub fn advance(&mut self, stage: Stage) -> Result<()> {
        let forward = matches!(
            &self.run.state,
            RunState::Running { current_stage, .. } if stage > *current_stage
        );
        if !forward {
            return Err(self.invalid(&format!("running({})", stage)));
        }

        if let RunState::Running { current_stage, .. } = &mut self.run.state {
            *current_stage = stage;
        }
        self.run.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self) -> Result<()> {
        match &self.run.state {
            RunState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.run.state = RunState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                };
                self.run.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("completed")),
        }
    }

    /// Transition: PENDING | RUNNING → CANCELLED
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.run.state.is_terminal() {
            return Err(self.invalid("cancelled"));
        }

        let now = Utc::now();
        self.run.state = RunState::Cancelled {
            cancelled_at: now,
            stage: self.run.state.current_stage(),
            reason: reason.into(),
        };
        self.run.updated_at = now;
        Ok(())
    }
}
