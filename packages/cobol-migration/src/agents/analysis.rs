//! Stage 2: per-program structural analysis

use super::AgentKind;
use crate::dependency_graph::DependencyGraph;
use crate::llm::{GenerationOptions, PromptSpec};
use crate::reference::ReferenceKind;
use crate::source::SourceUnit;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a COBOL expert analysing legacy programs \
before they are rewritten in Java. For the given program describe: the \
program identification, each division and section, the data structures \
(records, copybooks, working storage), file and database access, the \
paragraphs of the procedure division with their business logic, and calls \
to other programs. Use Markdown headings.";

static PROGRAM_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\bPROGRAM-ID\s*\.\s*['\x22]?([A-Z0-9][A-Z0-9_-]*)")
        .expect("valid PROGRAM-ID pattern")
});

static DIVISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(IDENTIFICATION|ID|ENVIRONMENT|DATA|PROCEDURE)\s+DIVISION\b")
        .expect("valid DIVISION pattern")
});

/// Outcome of analysing one program.
///
/// The structured fields are identifiers echoed from the source text; they
/// are not checked against the model's prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub unit_id: String,
    pub program_id: Option<String>,
    pub divisions: Vec<String>,
    pub copybooks: Vec<String>,
    pub calls: Vec<String>,
    pub raw_text: String,
    pub error: Option<String>,
}

impl AnalysisRecord {
    pub fn from_output(unit: &SourceUnit, graph: &DependencyGraph, raw: &str) -> Self {
        Self::echo(unit, graph, raw.trim().to_string(), None)
    }

    pub fn failed(unit: &SourceUnit, graph: &DependencyGraph, error: impl Into<String>) -> Self {
        Self::echo(unit, graph, String::new(), Some(error.into()))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn echo(unit: &SourceUnit, graph: &DependencyGraph, raw_text: String, error: Option<String>) -> Self {
        let mut copybooks = Vec::new();
        let mut calls = Vec::new();
        for edge in graph.edges().iter().filter(|e| e.source == unit.name) {
            let bucket = match edge.kind {
                ReferenceKind::Copy | ReferenceKind::Include => &mut copybooks,
                ReferenceKind::Call => &mut calls,
            };
            if !bucket.contains(&edge.target) {
                bucket.push(edge.target.clone());
            }
        }

        Self {
            unit_id: unit.name.clone(),
            program_id: program_id(&unit.content),
            divisions: divisions(&unit.content),
            copybooks,
            calls,
            raw_text,
            error,
        }
    }
}

fn program_id(content: &str) -> Option<String> {
    PROGRAM_ID_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
}

fn divisions(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in DIVISION_RE.captures_iter(content) {
        let name = match caps[1].to_uppercase().as_str() {
            "ID" => "IDENTIFICATION".to_string(),
            other => other.to_string(),
        };
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

pub fn build_prompt(unit: &SourceUnit, graph: &DependencyGraph, options: &GenerationOptions) -> PromptSpec {
    let mut user_prompt = format!("Analyze the COBOL program `{}`.\n\n", unit.name);

    let references = graph.references_of(&unit.name);
    if !references.is_empty() {
        user_prompt.push_str(&format!("It references: {}\n", references.join(", ")));
    }
    let callers = graph.referenced_by(&unit.name);
    if !callers.is_empty() {
        user_prompt.push_str(&format!("It is referenced by: {}\n", callers.join(", ")));
    }

    user_prompt.push_str(&format!("\n```cobol\n{}\n```\n", unit.content));

    PromptSpec {
        agent: AgentKind::StructuralAnalysis,
        unit_id: Some(unit.name.clone()),
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
        options: *options,
    }
}
