// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Built-in agent template catalog and cost-mode routing.
//!
//! Clients may override or extend the catalog per project: the templates in
//! `ProjectFileContext.agent_templates` are merged over the built-ins before
//! any lookup for that prompt.

use std::collections::{BTreeMap, BTreeSet};

use otto_proto::{AgentTemplate, CostMode, OutputMode};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown agent template: {0}")]
pub struct UnknownTemplate(pub String);

/// Deterministic cost-mode routing. A prompt without an explicit `agentId`
/// always resolves through this mapping.
pub fn template_id_for_cost_mode(mode: CostMode) -> &'static str {
    match mode {
        CostMode::Ask => "router-ask",
        CostMode::Lite => "coder-lite",
        CostMode::Normal => "coder",
        CostMode::Max => "coder-max",
        CostMode::Experimental => "coder-experimental",
    }
}

/// Read-only template catalog resolved once per prompt.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, AgentTemplate>,
}

impl TemplateRegistry {
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        for t in builtin_templates() {
            templates.insert(t.id.clone(), t);
        }
        Self { templates }
    }

    /// Merge per-project overrides over the built-in catalog. Overrides win
    /// on id conflicts; new ids extend the catalog.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, AgentTemplate>) -> Self {
        let mut merged = self.templates.clone();
        for (id, template) in overrides {
            let mut template = template.clone();
            template.id = id.clone();
            merged.insert(id.clone(), template);
        }
        Self { templates: merged }
    }

    pub fn get(&self, id: &str) -> Option<&AgentTemplate> {
        self.templates.get(id)
    }

    /// Resolve the root template for a prompt: explicit id wins, otherwise
    /// the cost-mode mapping applies.
    pub fn resolve(
        &self,
        agent_id: Option<&str>,
        cost_mode: CostMode,
    ) -> Result<&AgentTemplate, UnknownTemplate> {
        let id = agent_id.unwrap_or_else(|| template_id_for_cost_mode(cost_mode));
        self.get(id).ok_or_else(|| UnknownTemplate(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|s| s.as_str())
    }
}

fn tool_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

const READ_TOOLS: &[&str] = &[
    "code_search",
    "glob",
    "list_directory",
    "read_files",
    "browser_logs",
];

const EDIT_TOOLS: &[&str] = &[
    "write_file",
    "str_replace",
    "run_terminal_command",
    "run_file_change_hooks",
];

const NOTE_TOOLS: &[&str] = &["add_message", "update_subgoal", "end_turn", "set_output"];

const KNOWLEDGE_TOOLS: &[&str] = &["web_search", "read_docs"];

fn coder_prompt() -> String {
    "You are a senior software engineer working inside the user's repository. \
     Make the smallest change that fully solves the task, keep the project's \
     conventions, and verify your work with the tools available to you."
        .to_string()
}

fn builtin_templates() -> Vec<AgentTemplate> {
    let base = AgentTemplate {
        id: String::new(),
        display_name: String::new(),
        model: String::new(),
        tool_names: BTreeSet::new(),
        spawnable_agents: BTreeSet::new(),
        mcp_servers: BTreeMap::new(),
        include_message_history: true,
        inherit_parent_system_prompt: false,
        output_mode: OutputMode::LastMessage,
        system_prompt: String::new(),
        instructions_prompt: String::new(),
        step_prompt: String::new(),
        input_schema: None,
    };

    let all_coder_tools: Vec<&str> = READ_TOOLS
        .iter()
        .chain(EDIT_TOOLS)
        .chain(NOTE_TOOLS)
        .chain(KNOWLEDGE_TOOLS)
        .copied()
        .collect();

    vec![
        AgentTemplate {
            id: "coder".into(),
            display_name: "Coder".into(),
            model: "claude-sonnet-4-5".into(),
            tool_names: tool_set(
                &all_coder_tools
                    .iter()
                    .chain(&["spawn_agents", "spawn_agent_inline"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            spawnable_agents: tool_set(&["researcher", "reviewer", "file-explorer"]),
            system_prompt: coder_prompt(),
            step_prompt: "Continue with the next action. Call end_turn when the task is done."
                .into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "coder-lite".into(),
            display_name: "Coder (lite)".into(),
            model: "claude-haiku-4-5".into(),
            tool_names: tool_set(&all_coder_tools),
            system_prompt: coder_prompt(),
            step_prompt: "Work quickly and call end_turn as soon as the task is done.".into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "coder-max".into(),
            display_name: "Coder (max)".into(),
            model: "claude-opus-4-5".into(),
            tool_names: tool_set(
                &all_coder_tools
                    .iter()
                    .chain(&["spawn_agents", "spawn_agent_inline"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            spawnable_agents: tool_set(&["researcher", "reviewer", "file-explorer"]),
            system_prompt: coder_prompt(),
            step_prompt:
                "Think carefully, delegate research to sub-agents when useful, and call \
                 end_turn when the task is done."
                    .into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "coder-experimental".into(),
            display_name: "Coder (experimental)".into(),
            model: "gpt-5-preview".into(),
            tool_names: tool_set(
                &all_coder_tools
                    .iter()
                    .chain(&["spawn_agents", "spawn_agent_inline"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            spawnable_agents: tool_set(&["researcher", "reviewer", "file-explorer"]),
            system_prompt: coder_prompt(),
            ..base.clone()
        },
        AgentTemplate {
            id: "router-ask".into(),
            display_name: "Ask".into(),
            model: "gpt-4o-mini".into(),
            tool_names: tool_set(
                &READ_TOOLS
                    .iter()
                    .chain(NOTE_TOOLS)
                    .chain(KNOWLEDGE_TOOLS)
                    .chain(&["spawn_agents"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            spawnable_agents: tool_set(&["researcher", "file-explorer"]),
            system_prompt: "You answer questions about the user's codebase. You never \
                            modify files or run commands."
                .into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "researcher".into(),
            display_name: "Researcher".into(),
            model: "claude-sonnet-4-5".into(),
            tool_names: tool_set(
                &READ_TOOLS
                    .iter()
                    .chain(NOTE_TOOLS)
                    .chain(KNOWLEDGE_TOOLS)
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            system_prompt: "You research one focused question and report back a concise, \
                            sourced answer. You do not modify anything."
                .into(),
            step_prompt: "When you have the answer, state it and call end_turn.".into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "reviewer".into(),
            display_name: "Reviewer".into(),
            model: "claude-sonnet-4-5".into(),
            tool_names: tool_set(
                &READ_TOOLS
                    .iter()
                    .chain(&["set_output", "end_turn", "update_subgoal"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            output_mode: OutputMode::StructuredOutput,
            system_prompt: "You review a proposed change and report findings as structured \
                            output via set_output."
                .into(),
            ..base.clone()
        },
        AgentTemplate {
            id: "file-explorer".into(),
            display_name: "File explorer".into(),
            model: "gpt-4o-mini".into(),
            tool_names: tool_set(
                &READ_TOOLS
                    .iter()
                    .chain(&["end_turn", "set_output"])
                    .copied()
                    .collect::<Vec<_>>(),
            ),
            output_mode: OutputMode::AllMessages,
            inherit_parent_system_prompt: true,
            system_prompt: "You locate the files relevant to a task and summarise what you \
                            found."
                .into(),
            ..base
        },
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cost_mode_resolves_to_a_builtin() {
        let registry = TemplateRegistry::builtin();
        for mode in [
            CostMode::Ask,
            CostMode::Lite,
            CostMode::Normal,
            CostMode::Max,
            CostMode::Experimental,
        ] {
            let t = registry.resolve(None, mode).unwrap();
            assert_eq!(t.id, template_id_for_cost_mode(mode));
        }
    }

    #[test]
    fn cost_mode_routing_is_deterministic() {
        let registry = TemplateRegistry::builtin();
        let a = registry.resolve(None, CostMode::Normal).unwrap().id.clone();
        let b = registry.resolve(None, CostMode::Normal).unwrap().id.clone();
        assert_eq!(a, b);
        assert_eq!(a, "coder");
    }

    #[test]
    fn explicit_agent_id_wins_over_cost_mode() {
        let registry = TemplateRegistry::builtin();
        let t = registry.resolve(Some("researcher"), CostMode::Max).unwrap();
        assert_eq!(t.id, "researcher");
    }

    #[test]
    fn unknown_agent_id_is_an_error() {
        let registry = TemplateRegistry::builtin();
        assert!(registry.resolve(Some("nope"), CostMode::Normal).is_err());
    }

    #[test]
    fn spawnable_agents_exist_in_the_catalog() {
        let registry = TemplateRegistry::builtin();
        for id in registry.ids().map(str::to_string).collect::<Vec<_>>() {
            let t = registry.get(&id).unwrap();
            for spawnable in &t.spawnable_agents {
                assert!(
                    registry.get(spawnable).is_some(),
                    "{id} can spawn unknown template {spawnable}"
                );
            }
        }
    }

    #[test]
    fn overrides_replace_and_extend() {
        let registry = TemplateRegistry::builtin();
        let mut overrides = BTreeMap::new();
        let mut custom = registry.get("coder").unwrap().clone();
        custom.model = "local-model".to_string();
        overrides.insert("coder".to_string(), custom);
        let mut extra = registry.get("researcher").unwrap().clone();
        extra.display_name = "Deep researcher".to_string();
        overrides.insert("deep-researcher".to_string(), extra);

        let merged = registry.with_overrides(&overrides);
        assert_eq!(merged.get("coder").unwrap().model, "local-model");
        let added = merged.get("deep-researcher").unwrap();
        assert_eq!(added.id, "deep-researcher");
        // Built-ins that were not overridden are untouched.
        assert_eq!(
            merged.get("coder-max").unwrap().model,
            registry.get("coder-max").unwrap().model
        );
    }

    #[test]
    fn ask_template_has_no_write_tools() {
        let registry = TemplateRegistry::builtin();
        let ask = registry.resolve(None, CostMode::Ask).unwrap();
        assert!(!ask.tool_names.contains("write_file"));
        assert!(!ask.tool_names.contains("run_terminal_command"));
    }
}
