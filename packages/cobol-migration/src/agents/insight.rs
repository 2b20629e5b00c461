//! Stage 1: one call over the whole dependency graph

use super::AgentKind;
use crate::dependency_graph::DependencyGraph;
use crate::llm::{GenerationOptions, PromptSpec};

const SYSTEM_PROMPT: &str = "You are a mainframe modernization architect. \
You receive the dependency structure of a COBOL code base: programs, the \
copybooks they include and the programs they call. Describe the architecture \
in plain prose: shared data structures, tightly coupled program groups, \
circular dependencies, missing units and a sensible migration order. \
Be concise.";

pub fn build_prompt(graph: &DependencyGraph, options: &GenerationOptions) -> PromptSpec {
    PromptSpec {
        agent: AgentKind::DependencyInsight,
        unit_id: None,
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: format!(
            "Analyze the following COBOL dependency graph.\n\n{}",
            graph.summary()
        ),
        options: *options,
    }
}

pub fn handle_output(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceUnit;

    #[test]
    fn test_prompt_carries_graph_summary() {
        let graph = DependencyGraph::build(&[
            SourceUnit::program("MAIN.cbl", "COPY REC."),
            SourceUnit::module("REC.cpy", ""),
        ]);
        let prompt = build_prompt(&graph, &GenerationOptions::default());

        assert_eq!(prompt.agent, AgentKind::DependencyInsight);
        assert!(prompt.unit_id.is_none());
        assert!(prompt.user_prompt.contains("MAIN.cbl -> REC.cpy"));
    }

    #[test]
    fn test_output_trimmed() {
        assert_eq!(handle_output("\n  layered design \n"), "layered design");
    }
}
