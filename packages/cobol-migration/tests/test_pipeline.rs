//! Integration tests for the agent pipeline
//!
//! Covers the full three-stage run, unit-scoped failures, cancellation with
//! partial results and the fatal checks done by `run_pipeline`.

mod common;

use common::{java_for, sample_units, RecordingProgress, ScriptedClient};
use cobol_migration::config::PipelineConfig;
use cobol_migration::{
    run_pipeline, AgentKind, LlmError, OrchestratorError, PipelineOptions, ProgressSink, PromptSpec,
    RunState, SourceUnit, Stage, UnitErrorKind,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Well-behaved model: prose for insight and analysis, JSON for transformation
fn respond(prompt: &PromptSpec) -> Result<String, LlmError> {
    let unit = prompt.unit_id.clone().unwrap_or_default();
    Ok(match prompt.agent {
        AgentKind::DependencyInsight => "Two programs share EMPREC.".to_string(),
        AgentKind::StructuralAnalysis => format!("## Analysis of {}", unit),
        AgentKind::Transformation => format!("```json\n{}\n```", java_for(&unit)),
    })
}

fn options(progress: Arc<RecordingProgress>) -> PipelineOptions {
    PipelineOptions {
        config: PipelineConfig::default(),
        progress: Some(progress),
        cancel: None,
    }
}

#[tokio::test]
async fn test_full_run() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));
    let progress = Arc::new(RecordingProgress::default());

    let result = run_pipeline(&units, client.clone(), options(progress.clone()))
        .await
        .unwrap();

    assert!(result.is_completed());
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
    assert!(result.skipped.is_empty());
    assert_eq!(
        result.dependency_graph.insight(),
        "Two programs share EMPREC."
    );

    let analysed: Vec<&str> = result.analyses.iter().map(|a| a.unit_id.as_str()).collect();
    assert_eq!(analysed, vec!["PAYROLL.cbl", "TAXCALC.cbl", "REPORT.cbl"]);
    assert_eq!(result.analyses[0].raw_text, "## Analysis of PAYROLL.cbl");
    assert_eq!(result.analyses[0].program_id.as_deref(), Some("PAYROLL"));
    assert_eq!(result.analyses[0].calls, vec!["TAXCALC.cbl"]);

    let files: Vec<(&str, &str)> = result
        .artifacts
        .iter()
        .map(|a| (a.file_name.as_str(), a.origin_unit.as_str()))
        .collect();
    assert_eq!(
        files,
        vec![
            ("Payroll.java", "PAYROLL.cbl"),
            ("Taxcalc.java", "TAXCALC.cbl"),
            ("Report.java", "REPORT.cbl"),
        ]
    );
    assert_eq!(result.artifacts[0].package_path, "com/example/migrated");
    assert_eq!(result.artifacts[0].type_name, "Payroll");

    // Modules are never stage targets
    assert!(client
        .calls()
        .iter()
        .all(|(_, unit)| unit.as_deref().map_or(true, |u| u.ends_with(".cbl"))));
    assert_eq!(client.call_count(), 7);
    assert_eq!(result.step_results.len(), 7);
    assert_eq!(result.stats.calls, 7);
    assert_eq!(result.stats.successes, 7);
    assert_eq!(result.stats.retries, 0);

    assert_eq!(progress.for_stage(Stage::DependencyInsight), vec![(1, 1)]);
    assert_eq!(
        progress.for_stage(Stage::StructuralAnalysis),
        vec![(1, 3), (2, 3), (3, 3)]
    );
    assert_eq!(
        progress.for_stage(Stage::Transformation),
        vec![(1, 3), (2, 3), (3, 3)]
    );
}

#[tokio::test]
async fn test_transformation_prompt_carries_context() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| {
        if prompt.agent == AgentKind::Transformation && prompt.unit_id.as_deref() == Some("PAYROLL.cbl") {
            assert!(prompt.user_prompt.contains("## Analysis of PAYROLL.cbl"));
            assert!(prompt.user_prompt.contains("### EMPREC.cpy"));
            assert!(prompt.user_prompt.contains("com.example.migrated"));
        }
        respond(prompt)
    }));

    let result = run_pipeline(&units, client, PipelineOptions::default())
        .await
        .unwrap();
    assert!(result.is_completed());
}

#[tokio::test]
async fn test_failed_analysis_is_skipped() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| {
        if prompt.agent == AgentKind::StructuralAnalysis && prompt.unit_id.as_deref() == Some("TAXCALC.cbl") {
            return Err(LlmError::other("400 Bad Request"));
        }
        respond(prompt)
    }));
    let progress = Arc::new(RecordingProgress::default());

    let result = run_pipeline(&units, client.clone(), options(progress.clone()))
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.analyses.len(), 3);
    assert!(!result.analyses[1].is_success());
    assert_eq!(result.successful_analyses().count(), 2);

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].stage, Stage::StructuralAnalysis);
    assert_eq!(result.errors[0].kind, UnitErrorKind::Invocation);
    assert_eq!(result.errors[0].unit_id.as_deref(), Some("TAXCALC.cbl"));
    assert!(result.errors[0].message.contains("400 Bad Request"));

    assert_eq!(result.skipped, vec!["TAXCALC.cbl"]);
    assert_eq!(
        client.calls_for(AgentKind::Transformation),
        vec![Some("PAYROLL.cbl".to_string()), Some("REPORT.cbl".to_string())]
    );
    assert_eq!(result.artifacts.len(), 2);
    assert_eq!(result.artifacts_for("TAXCALC.cbl").count(), 0);
    assert_eq!(
        progress.for_stage(Stage::Transformation),
        vec![(1, 2), (2, 2)]
    );
}

#[tokio::test]
async fn test_unparseable_transformation_is_recorded() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| {
        if prompt.agent == AgentKind::Transformation && prompt.unit_id.as_deref() == Some("REPORT.cbl") {
            return Ok("I am unable to convert this program.".to_string());
        }
        respond(prompt)
    }));

    let result = run_pipeline(&units, client, PipelineOptions::default())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.artifacts.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].stage, Stage::Transformation);
    assert_eq!(result.errors[0].kind, UnitErrorKind::Parse);
    assert_eq!(result.errors[0].unit_id.as_deref(), Some("REPORT.cbl"));

    // The call itself succeeded
    let step = result
        .step_results
        .iter()
        .find(|s| s.agent == AgentKind::Transformation && s.unit_id.as_deref() == Some("REPORT.cbl"))
        .unwrap();
    assert!(step.success);
}

#[tokio::test]
async fn test_insight_failure_is_a_warning() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| {
        if prompt.agent == AgentKind::DependencyInsight {
            return Err(LlmError::other("model not found"));
        }
        respond(prompt)
    }));

    let result = run_pipeline(&units, client, PipelineOptions::default())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.dependency_graph.insight(), "");
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("model not found"));
    assert!(result.errors.is_empty());
    assert_eq!(result.artifacts.len(), 3);
}

#[tokio::test]
async fn test_cancel_during_analysis_keeps_partial_results() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let progress: Arc<dyn ProgressSink> = Arc::new(move |stage: Stage, current: usize, _total: usize| {
        if stage == Stage::StructuralAnalysis && current == 1 {
            trigger.cancel();
        }
    });

    let result = run_pipeline(
        &units,
        client.clone(),
        PipelineOptions {
            config: PipelineConfig::default(),
            progress: Some(progress),
            cancel: Some(cancel),
        },
    )
    .await
    .unwrap();

    assert!(result.is_cancelled());
    match &result.status {
        RunState::Cancelled { stage, .. } => assert_eq!(*stage, Some(Stage::StructuralAnalysis)),
        other => panic!("Expected Cancelled state, got {:?}", other),
    }
    assert_eq!(result.analyses.len(), 1);
    assert_eq!(result.analyses[0].unit_id, "PAYROLL.cbl");
    assert!(result.artifacts.is_empty());
    assert!(client.calls_for(AgentKind::Transformation).is_empty());
    assert_eq!(client.calls_for(AgentKind::StructuralAnalysis).len(), 1);
    // Graph and insight survive cancellation
    assert_eq!(result.dependency_graph.metrics().program_count, 3);
    assert!(!result.dependency_graph.insight().is_empty());
}

#[tokio::test]
async fn test_cancel_during_transformation_keeps_partial_results() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let progress: Arc<dyn ProgressSink> = Arc::new(move |stage: Stage, current: usize, _total: usize| {
        if stage == Stage::Transformation && current == 1 {
            trigger.cancel();
        }
    });

    let result = run_pipeline(
        &units,
        client.clone(),
        PipelineOptions {
            config: PipelineConfig::default(),
            progress: Some(progress),
            cancel: Some(cancel),
        },
    )
    .await
    .unwrap();

    assert!(result.is_cancelled());
    match &result.status {
        RunState::Cancelled { stage, .. } => assert_eq!(*stage, Some(Stage::Transformation)),
        other => panic!("Expected Cancelled state, got {:?}", other),
    }
    assert_eq!(result.analyses.len(), 3);
    assert_eq!(result.successful_analyses().count(), 3);
    assert_eq!(
        client.calls_for(AgentKind::Transformation),
        vec![Some("PAYROLL.cbl".to_string())]
    );
    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts_for("PAYROLL.cbl").count(), 1);
    assert_eq!(client.call_count(), 5);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_cancel_before_start() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_pipeline(
        &units,
        client.clone(),
        PipelineOptions {
            cancel: Some(cancel),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(matches!(result.status, RunState::Cancelled { stage: None, .. }));
    assert_eq!(client.call_count(), 0);
    assert!(result.step_results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_in_pipeline() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, previous| {
        if prompt.agent == AgentKind::StructuralAnalysis && prompt.unit_id.as_deref() == Some("PAYROLL.cbl") && previous == 0 {
            return Err(LlmError::timeout("gateway timeout"));
        }
        respond(prompt)
    }));

    let result = run_pipeline(&units, client.clone(), PipelineOptions::default())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert!(result.errors.is_empty());
    assert_eq!(result.stats.calls, 8);
    assert_eq!(result.stats.retries, 1);
    assert_eq!(result.stats.failures, 1);

    let step = result
        .step_results
        .iter()
        .find(|s| s.agent == AgentKind::StructuralAnalysis && s.unit_id.as_deref() == Some("PAYROLL.cbl"))
        .unwrap();
    assert_eq!(step.attempts, 2);
    assert!(step.success);
}

#[tokio::test]
async fn test_duplicate_units_rejected_before_any_call() {
    let mut units = sample_units();
    units.push(SourceUnit::program("PAYROLL.cbl", "duplicate"));
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));

    let result = run_pipeline(&units, client.clone(), PipelineOptions::default()).await;

    assert!(matches!(result, Err(OrchestratorError::DuplicateUnit(name)) if name == "PAYROLL.cbl"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_any_call() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));
    let mut config = PipelineConfig::default();
    config.retry.max_attempts = 0;

    let result = run_pipeline(
        &units,
        client.clone(),
        PipelineOptions {
            config,
            ..Default::default()
        },
    )
    .await;

    assert!(matches!(result, Err(OrchestratorError::Config(_))));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_modules_only_input() {
    let units = vec![SourceUnit::module("EMPREC.cpy", "01 EMP-REC PIC X.")];
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));

    let result = run_pipeline(&units, client.clone(), PipelineOptions::default())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert!(result.analyses.is_empty());
    assert!(result.artifacts.is_empty());
    assert_eq!(result.dependency_graph.metrics().average_fan_out, 0.0);
    assert_eq!(client.calls_for(AgentKind::DependencyInsight).len(), 1);
}

#[tokio::test]
async fn test_result_serializes() {
    let units = sample_units();
    let client = Arc::new(ScriptedClient::new(|prompt, _| respond(prompt)));

    let result = run_pipeline(&units, client, PipelineOptions::default())
        .await
        .unwrap();
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"]["type"], "completed");
    assert_eq!(value["artifacts"].as_array().unwrap().len(), 3);
    assert_eq!(value["dependency_graph"]["metrics"]["program_count"], 3);
    assert_eq!(value["step_results"][0]["agent"], "dependency_insight");
}
