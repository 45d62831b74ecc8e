// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;
use crate::template::AgentTemplate;

/// Terminal result of an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentOutput {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
}

impl AgentOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Mutable per-instance state of one agent. Serializable: the root agent's
/// state travels to the client inside `prompt-response` and comes back with
/// the next `prompt` so a conversation can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub agent_type: String,
    #[serde(default)]
    pub message_history: Vec<Message>,
    pub steps_remaining: u32,
    #[serde(default)]
    pub credits_used: u64,
    #[serde(default)]
    pub direct_credits_used: u64,
    /// Named notes the agent persists across steps via `update_subgoal`.
    #[serde(default)]
    pub subgoals: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
}

impl AgentState {
    pub fn new(agent_type: impl Into<String>, steps: u32) -> Self {
        Self {
            agent_id: Uuid::new_v4().to_string(),
            parent_id: None,
            agent_type: agent_type.into(),
            message_history: Vec::new(),
            steps_remaining: steps,
            credits_used: 0,
            direct_credits_used: 0,
            subgoals: BTreeMap::new(),
            output: None,
        }
    }

    pub fn child_of(parent: &AgentState, agent_type: impl Into<String>, steps: u32) -> Self {
        let mut child = Self::new(agent_type, steps);
        child.parent_id = Some(parent.agent_id.clone());
        child
    }

    pub fn is_terminal(&self) -> bool {
        self.output.is_some()
    }

    /// Credit counters arriving from the client are untrusted; the server
    /// zeroes them before the loop starts and rebuilds them from its own
    /// accounting.
    pub fn reset_credit_counters(&mut self) {
        self.credits_used = 0;
        self.direct_credits_used = 0;
    }

    /// Record credits spent directly by this agent (its own model calls and
    /// charged tool calls).
    pub fn add_direct_credits(&mut self, amount: u64) {
        self.direct_credits_used += amount;
        self.credits_used += amount;
    }

    /// Fold a finished child's total into this agent's roll-up counter.
    pub fn add_child_credits(&mut self, amount: u64) {
        self.credits_used += amount;
    }

    /// The text of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.message_history
            .iter()
            .rev()
            .filter(|m| m.role == crate::message::Role::Assistant)
            .find_map(|m| m.as_text())
    }
}

/// The serializable bundle exchanged with the client on every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub main_agent_state: AgentState,
    #[serde(default)]
    pub file_context: ProjectFileContext,
}

impl SessionState {
    pub fn fresh(agent_type: impl Into<String>, steps: u32) -> Self {
        Self {
            main_agent_state: AgentState::new(agent_type, steps),
            file_context: ProjectFileContext::default(),
        }
    }
}

/// A user-defined tool the client executes itself; advertised to the model
/// alongside the built-in set and round-tripped like any delegated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub ends_agent_step: bool,
}

/// Project context snapshotted by the client and sent with `init`/`prompt`.
/// The server treats it as opaque input for prompt rendering and template
/// resolution; it never reads the project's disk itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileContext {
    #[serde(default)]
    pub project_root: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub file_tree: Vec<String>,
    /// Relevance scores per path, used to pick which files to mention in the
    /// rendered context excerpt.
    #[serde(default)]
    pub file_token_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub knowledge_files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_changes: Option<GitChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
    /// Per-project template overrides; merged over the built-in catalog.
    #[serde(default)]
    pub agent_templates: BTreeMap<String, AgentTemplate>,
    #[serde(default)]
    pub custom_tool_definitions: Vec<CustomToolDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitChanges {
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub shell: String,
}
