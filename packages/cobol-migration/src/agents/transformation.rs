//! Stage 3: COBOL → Java rewrite of one analysed program

use super::{AgentKind, AnalysisRecord};
use crate::artifact::GeneratedArtifact;
use crate::config::TransformationConfig;
use crate::dependency_graph::DependencyGraph;
use crate::llm::{GenerationOptions, PromptSpec};
use crate::output_parser::{self, ParseError};
use crate::source::SourceUnit;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You convert COBOL programs into idiomatic, modern \
Java (Java 17). Preserve the business logic exactly. Map records and copybooks \
to classes, paragraphs to methods and file or database access to clearly \
separated service classes. Respond with ONLY a JSON object whose keys are Java \
file names and whose values are the complete file contents. No prose, no \
Markdown.";

/// Artifacts recovered from one transformation, plus the parse failure if any
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformationOutput {
    pub artifacts: Vec<GeneratedArtifact>,
    pub parse_error: Option<ParseError>,
}

pub fn build_prompt(
    unit: &SourceUnit,
    analysis: &AnalysisRecord,
    graph: &DependencyGraph,
    units: &[SourceUnit],
    config: &TransformationConfig,
    options: &GenerationOptions,
) -> PromptSpec {
    let mut user_prompt = format!(
        "Convert the COBOL program `{}` to Java.\nAll classes belong to package `{}`.\n\n",
        unit.name, config.target_package
    );

    if !analysis.raw_text.is_empty() {
        user_prompt.push_str("## Analysis\n\n");
        user_prompt.push_str(&analysis.raw_text);
        user_prompt.push_str("\n\n");
    }

    user_prompt.push_str(&format!("## Program\n\n```cobol\n{}\n```\n", unit.content));

    let (context, omitted) = module_context(unit, graph, units, config.max_context_chars);
    if !context.is_empty() {
        user_prompt.push_str("\n## Referenced modules\n");
        user_prompt.push_str(&context);
    }
    if !omitted.is_empty() {
        debug!(
            "Unit {}: {} referenced modules left out of the prompt",
            unit.name,
            omitted.len()
        );
        user_prompt.push_str(&format!(
            "\nOmitted for size (assume standard record layouts): {}\n",
            omitted.join(", ")
        ));
    }

    PromptSpec {
        agent: AgentKind::Transformation,
        unit_id: Some(unit.name.clone()),
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
        options: *options,
    }
}

/// Text of the directly referenced input modules, in reference order, until
/// `budget` characters are used. Returns the text and the modules left out.
fn module_context(
    unit: &SourceUnit,
    graph: &DependencyGraph,
    units: &[SourceUnit],
    budget: usize,
) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut omitted = Vec::new();
    let mut used = 0;

    for target in graph.references_of(&unit.name) {
        let Some(module) = units.iter().find(|u| u.is_module && &u.name == target) else {
            continue;
        };

        let chars = module.content.chars().count();
        if used + chars > budget {
            omitted.push(module.name.clone());
            continue;
        }
        used += chars;
        context.push_str(&format!("\n### {}\n\n```cobol\n{}\n```\n", module.name, module.content));
    }

    (context, omitted)
}

/// Turn model output into artifacts attributed to `origin_unit`
pub fn handle_output(origin_unit: &str, raw: &str) -> TransformationOutput {
    let parsed = output_parser::parse(raw);
    TransformationOutput {
        artifacts: parsed
            .files
            .into_iter()
            .map(|(file_name, content)| GeneratedArtifact::new(file_name, content, origin_unit))
            .collect(),
        parse_error: parsed.error,
    }
}
