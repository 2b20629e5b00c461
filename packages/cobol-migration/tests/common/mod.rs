//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cobol_migration::{AgentKind, LlmClient, LlmError, PromptSpec, SourceUnit, Stage};
use parking_lot::Mutex;

type Responder = dyn Fn(&PromptSpec, u32) -> Result<String, LlmError> + Send + Sync;

/// LLM client answering from a closure.
///
/// The closure gets the prompt and how many times the same (agent, unit)
/// pair was called before, so "fail once, then succeed" is `n == 0`.
pub struct ScriptedClient {
    responder: Box<Responder>,
    calls: Mutex<Vec<(AgentKind, Option<String>)>>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&PromptSpec, u32) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn failing(error: LlmError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    pub fn calls(&self) -> Vec<(AgentKind, Option<String>)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, agent: AgentKind) -> Vec<Option<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == agent)
            .map(|(_, unit)| unit.clone())
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, prompt: &PromptSpec) -> Result<String, LlmError> {
        let previous = {
            let mut calls = self.calls.lock();
            let key = (prompt.agent, prompt.unit_id.clone());
            let previous = calls.iter().filter(|call| **call == key).count() as u32;
            calls.push(key);
            previous
        };
        (self.responder)(prompt, previous)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Progress sink that remembers every report
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(Stage, usize, usize)>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<(Stage, usize, usize)> {
        self.events.lock().clone()
    }

    pub fn for_stage(&self, stage: Stage) -> Vec<(usize, usize)> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _, _)| *s == stage)
            .map(|(_, current, total)| (*current, *total))
            .collect()
    }
}

impl cobol_migration::ProgressSink for RecordingProgress {
    fn on_progress(&self, stage: Stage, current: usize, total: usize) {
        self.events.lock().push((stage, current, total));
    }
}

/// `{"<Stem>.java": "package …; public class <Stem> {}"}` for a unit
pub fn java_for(unit_id: &str) -> String {
    let stem = unit_id.split('.').next().unwrap_or(unit_id);
    let class = format!("{}{}", &stem[..1], stem[1..].to_lowercase());
    let mut files = serde_json::Map::new();
    files.insert(
        format!("{}.java", class),
        serde_json::Value::String(format!(
            "package com.example.migrated;\n\npublic class {} {{\n}}\n",
            class
        )),
    );
    serde_json::Value::Object(files).to_string()
}

/// Three programs and two copybooks
pub fn sample_units() -> Vec<SourceUnit> {
    vec![
        SourceUnit::program(
            "PAYROLL.cbl",
            "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. PAYROLL.\n       DATA DIVISION.\n       COPY EMPREC.\n       PROCEDURE DIVISION.\n           CALL 'TAXCALC' USING EMP-REC.\n",
        ),
        SourceUnit::program(
            "TAXCALC.cbl",
            "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. TAXCALC.\n       DATA DIVISION.\n       COPY TAXTBL.\n       PROCEDURE DIVISION.\n           GOBACK.\n",
        ),
        SourceUnit::program(
            "REPORT.cbl",
            "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. REPORT.\n       DATA DIVISION.\n       COPY EMPREC.\n",
        ),
        SourceUnit::module("EMPREC.cpy", "       01 EMP-REC.\n          05 EMP-ID PIC 9(6).\n"),
        SourceUnit::module("TAXTBL.cpy", "       01 TAX-TABLE PIC X(100).\n"),
    ]
}
