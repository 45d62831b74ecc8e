// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Prompt assembly for one step.
//!
//! Order: system message (template prompts + tool protocol + rendered file
//! context) → the agent's message history → the template's step prompt as a
//! trailing user message. The step prompt is sent with every request but
//! never stored in the history.

use otto_proto::{AgentTemplate, Message, ProjectFileContext};
use otto_tools::ToolSchema;

const MAX_CONTEXT_FILES: usize = 25;
const MAX_KNOWLEDGE_CHARS: usize = 2000;

pub fn assemble(
    template: &AgentTemplate,
    inherited_system: Option<&str>,
    file_context: &ProjectFileContext,
    schemas: &[ToolSchema],
    history: &[Message],
) -> Vec<Message> {
    let system = render_system(template, inherited_system, file_context, schemas);
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    if !template.step_prompt.is_empty() {
        messages.push(Message::user(template.step_prompt.clone()));
    }
    messages
}

fn render_system(
    template: &AgentTemplate,
    inherited_system: Option<&str>,
    file_context: &ProjectFileContext,
    schemas: &[ToolSchema],
) -> String {
    let mut sections: Vec<String> = Vec::new();
    if let Some(parent) = inherited_system {
        if !parent.is_empty() {
            sections.push(parent.to_string());
        }
    }
    if !template.system_prompt.is_empty() {
        sections.push(template.system_prompt.clone());
    }
    if !template.instructions_prompt.is_empty() {
        sections.push(template.instructions_prompt.clone());
    }
    if !schemas.is_empty() {
        sections.push(render_tool_protocol(schemas));
    }
    let context = render_file_context(file_context);
    if !context.is_empty() {
        sections.push(context);
    }
    sections.join("\n\n")
}

fn render_tool_protocol(schemas: &[ToolSchema]) -> String {
    let mut out = String::from(
        "# Tools\n\
         Invoke a tool by writing `<tool:NAME {\"param\": ...}>` on its own \
         line, with the arguments as a single JSON object. You may call \
         several tools in one response; their effects apply in order.\n\
         Available tools:\n",
    );
    for schema in schemas {
        out.push_str(&format!(
            "\n## {}\n{}\nParameters: {}\n",
            schema.name, schema.description, schema.parameters
        ));
    }
    out
}

/// Render the project context excerpt the agent sees every step: roots,
/// environment, git state, the highest-relevance files, and knowledge
/// files. The full tree never goes to the model, only the scored head.
pub fn render_file_context(fc: &ProjectFileContext) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !fc.project_root.is_empty() || !fc.cwd.is_empty() {
        let mut s = String::from("# Project\n");
        if !fc.project_root.is_empty() {
            s.push_str(&format!("Root: {}\n", fc.project_root));
        }
        if !fc.cwd.is_empty() {
            s.push_str(&format!("Cwd: {}\n", fc.cwd));
        }
        if let Some(info) = &fc.system_info {
            s.push_str(&format!("Platform: {} ({})\n", info.platform, info.shell));
        }
        sections.push(s.trim_end().to_string());
    }

    if let Some(git) = &fc.git_changes {
        if !git.branch.is_empty() || !git.status.is_empty() {
            sections.push(format!(
                "# Git\nBranch: {}\n{}",
                git.branch,
                git.status.trim_end()
            ));
        }
    }

    let files = relevant_files(fc);
    if !files.is_empty() {
        sections.push(format!("# Relevant files\n{}", files.join("\n")));
    }

    if !fc.knowledge_files.is_empty() {
        let mut s = String::from("# Knowledge\n");
        for (name, content) in &fc.knowledge_files {
            let truncated: String = content.chars().take(MAX_KNOWLEDGE_CHARS).collect();
            s.push_str(&format!("## {name}\n{truncated}\n"));
        }
        sections.push(s.trim_end().to_string());
    }

    sections.join("\n\n")
}

/// Highest-scored paths first; falls back to file-tree order when the
/// client sent no scores.
fn relevant_files(fc: &ProjectFileContext) -> Vec<String> {
    if fc.file_token_scores.is_empty() {
        return fc
            .file_tree
            .iter()
            .take(MAX_CONTEXT_FILES)
            .cloned()
            .collect();
    }
    let mut scored: Vec<(&String, f64)> = fc
        .file_token_scores
        .iter()
        .map(|(path, score)| (path, *score))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(MAX_CONTEXT_FILES)
        .map(|(path, _)| path.clone())
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use otto_proto::Role;
    use serde_json::json;

    fn template() -> AgentTemplate {
        serde_json::from_value(json!({
            "id": "t",
            "model": "mock",
            "systemPrompt": "You are a test agent.",
            "stepPrompt": "Continue.",
        }))
        .unwrap()
    }

    #[test]
    fn system_message_comes_first_step_prompt_last() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let messages = assemble(&template(), None, &ProjectFileContext::default(), &[], &history);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.last().unwrap().as_text(), Some("Continue."));
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn inherited_system_prompt_leads_the_system_message() {
        let messages = assemble(
            &template(),
            Some("Parent rules."),
            &ProjectFileContext::default(),
            &[],
            &[],
        );
        let system = messages[0].as_text().unwrap();
        assert!(system.starts_with("Parent rules."));
        assert!(system.contains("You are a test agent."));
    }

    #[test]
    fn tool_protocol_lists_schemas() {
        let schemas = vec![ToolSchema {
            name: "glob".into(),
            description: "find files".into(),
            parameters: json!({"type": "object"}),
            ends_agent_step: false,
        }];
        let messages = assemble(
            &template(),
            None,
            &ProjectFileContext::default(),
            &schemas,
            &[],
        );
        let system = messages[0].as_text().unwrap();
        assert!(system.contains("<tool:NAME"));
        assert!(system.contains("## glob"));
    }

    #[test]
    fn file_context_prefers_scored_files() {
        let mut fc = ProjectFileContext::default();
        fc.project_root = "/repo".into();
        fc.file_tree = vec!["z.rs".into(), "a.rs".into()];
        fc.file_token_scores.insert("low.rs".into(), 0.1);
        fc.file_token_scores.insert("high.rs".into(), 0.9);
        let rendered = render_file_context(&fc);
        let high = rendered.find("high.rs").unwrap();
        let low = rendered.find("low.rs").unwrap();
        assert!(high < low);
        assert!(rendered.contains("Root: /repo"));
    }

    #[test]
    fn empty_context_renders_empty() {
        assert!(render_file_context(&ProjectFileContext::default()).is_empty());
    }
}
