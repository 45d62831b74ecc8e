// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// How an agent's terminal output is derived when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The last assistant message becomes the output.
    #[default]
    LastMessage,
    /// The agent must call `set_output`; its value becomes the output.
    StructuredOutput,
    /// Like `last_message`, but a parent that spawned this agent inline also
    /// receives the full message history spliced into its own.
    AllMessages,
}

/// Connection settings for one MCP server a template may declare.
///
/// MCP servers are executed by the connected client, so this config travels
/// verbatim inside `request-tool-call` actions and is never interpreted on
/// the server beyond name matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Static description of one kind of agent: which model it runs, which tools
/// it may call, which other agents it may spawn, and the prompts that frame
/// every step.
///
/// Built-in templates ship in the config crate; clients may override or add
/// templates per project through the file context they send with a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTemplate {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub model: String,
    #[serde(default)]
    pub tool_names: BTreeSet<String>,
    #[serde(default)]
    pub spawnable_agents: BTreeSet<String>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default = "default_true")]
    pub include_message_history: bool,
    #[serde(default)]
    pub inherit_parent_system_prompt: bool,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub instructions_prompt: String,
    #[serde(default)]
    pub step_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

impl AgentTemplate {
    /// Whether `tool` is in this template's allowed set, either directly or
    /// as a namespaced tool of a declared MCP server (`server/tool`).
    pub fn allows_tool(&self, tool: &str) -> bool {
        if self.tool_names.contains(tool) {
            return true;
        }
        match tool.split_once('/') {
            Some((server, _)) => self.mcp_servers.contains_key(server),
            None => false,
        }
    }
}
