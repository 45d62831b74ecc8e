// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use otto_proto::ToolCall;

use crate::tool::{parse_input, HandlerOutcome, SpawnSpec, StateEffect, ToolContext, ToolHandler};

/// Upper bound on siblings in one spawn call; anything larger is almost
/// certainly a confused model.
const MAX_PARALLEL_AGENTS: usize = 16;

// ─── spawn_agents ─────────────────────────────────────────────────────────────

pub struct SpawnAgentsTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SpawnAgentsInput {
    agents: Vec<SpawnSpec>,
}

#[async_trait]
impl ToolHandler for SpawnAgentsTool {
    fn name(&self) -> &str {
        "spawn_agents"
    }

    fn description(&self) -> &str {
        "Spawn one or more sub-agents that run in parallel. You resume once \
         all of them have finished; their outputs arrive as this call's \
         result, in the order you listed them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "agent_type": { "type": "string" },
                            "prompt": { "type": "string" },
                            "params": { "type": "object" }
                        },
                        "required": ["agent_type"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["agents"],
            "additionalProperties": false
        })
    }

    fn ends_agent_step(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        let input: SpawnAgentsInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };
        if input.agents.is_empty() {
            return HandlerOutcome::error("agents must not be empty");
        }
        if input.agents.len() > MAX_PARALLEL_AGENTS {
            return HandlerOutcome::error(format!(
                "at most {MAX_PARALLEL_AGENTS} agents per spawn_agents call"
            ));
        }
        HandlerOutcome::effect(StateEffect::Spawn {
            inline: false,
            agents: input.agents,
        })
    }
}

// ─── spawn_agent_inline ───────────────────────────────────────────────────────

pub struct SpawnAgentInlineTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SpawnAgentInlineInput {
    agent_type: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

#[async_trait]
impl ToolHandler for SpawnAgentInlineTool {
    fn name(&self) -> &str {
        "spawn_agent_inline"
    }

    fn description(&self) -> &str {
        "Spawn a single sub-agent and wait for it. If its template exposes \
         all messages, its full conversation is spliced into yours."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_type": { "type": "string" },
                "prompt": { "type": "string" },
                "params": { "type": "object" }
            },
            "required": ["agent_type"],
            "additionalProperties": false
        })
    }

    fn ends_agent_step(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        let input: SpawnAgentInlineInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };
        HandlerOutcome::effect(StateEffect::Spawn {
            inline: true,
            agents: vec![SpawnSpec {
                agent_type: input.agent_type,
                prompt: input.prompt,
                params: input.params,
            }],
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
