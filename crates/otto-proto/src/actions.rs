// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol between a connected client and the gateway.
//!
//! All frames are JSON objects with a discriminating `type`. One persistent
//! WebSocket carries both directions for a client session.
//!
//! # Typical prompt flow
//!
//! ```text
//! Client                                Gateway
//!    │                                     │
//!    │── prompt {promptId, sessionState} ─►│  gate chain (auth, org, quota)
//!    │◄─ usage-response ───────────────────│
//!    │◄─ response-chunk {start} ───────────│
//!    │◄─ response-chunk {text} × N ────────│
//!    │◄─ request-tool-call {toolCallId} ───│  (client-executed tool)
//!    │── prompt … toolResults … ───────────│  (reply routed by toolCallId)
//!    │◄─ response-chunk {tool_result} ─────│
//!    │◄─ response-chunk {finish} ──────────│
//!    │◄─ prompt-response {sessionState} ───│  exactly one terminal action
//! ```
//!
//! `cancel-user-input` targets a running prompt by its `promptId`; the
//! gateway fires that prompt's cancellation signal, the agent tree drains,
//! and the terminal action still arrives (with an `aborted` error output).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ContentPart, ToolCall, ToolResult, ToolResultOutput};
use crate::state::{AgentOutput, ProjectFileContext, SessionState};
use crate::template::McpServerConfig;
use crate::usage::{Balance, BalanceBreakdown};

/// Coarse knob selecting the default agent template for a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    Ask,
    Lite,
    #[default]
    Normal,
    Max,
    Experimental,
}

// ─── Client → Server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientAction {
    /// Handshake: announce the client and its project context.
    #[serde(rename_all = "camelCase")]
    Init {
        fingerprint_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
        #[serde(default)]
        file_context: ProjectFileContext,
    },

    /// Run the agent loop over a new user prompt.
    #[serde(rename_all = "camelCase")]
    Prompt {
        fingerprint_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
        /// Identifies this prompt; doubles as the `userInputId` on every
        /// chunk and error the gateway sends back for it.
        prompt_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        /// Multimodal content (images) accompanying or replacing `prompt`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Vec<ContentPart>>,
        session_state: SessionState,
        #[serde(default)]
        cost_mode: CostMode,
        /// Explicit template id; overrides `cost_mode` routing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_params: Option<serde_json::Value>,
        /// Results of client-executed tools completed out-of-band since the
        /// previous prompt; appended to history before the loop starts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_results: Option<Vec<ToolResult>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_url: Option<String>,
    },

    /// Cancel a running prompt. Repeats are no-ops.
    #[serde(rename_all = "camelCase")]
    CancelUserInput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
        prompt_id: String,
    },

    /// Reply to a `request-tool-call` RPC, routed back by `toolCallId`.
    #[serde(rename_all = "camelCase")]
    ToolCallResponse {
        user_input_id: String,
        tool_call_id: String,
        output: Vec<ToolResultOutput>,
        /// Cost reported by an MCP provider, charged to the calling agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credits_used: Option<u64>,
    },

    /// Reply to a `request-files` RPC.
    #[serde(rename_all = "camelCase")]
    FilesResponse {
        user_input_id: String,
        files: std::collections::BTreeMap<String, String>,
    },
}

// ─── Server → Client ──────────────────────────────────────────────────────────

/// Usage block shared by `init-response` and `usage-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Credits consumed in the current quota cycle.
    pub usage: i64,
    pub remaining_balance: i64,
    pub balance_breakdown: BalanceBreakdown,
    #[serde(rename = "next_quota_reset")]
    pub next_quota_reset: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_topup_added: Option<i64>,
}

impl UsageReport {
    pub fn from_balance(usage: i64, balance: &Balance, next_quota_reset: DateTime<Utc>) -> Self {
        Self {
            usage,
            remaining_balance: balance.total_remaining,
            balance_breakdown: balance.breakdown,
            next_quota_reset,
            auto_topup_added: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerAction {
    #[serde(rename_all = "camelCase")]
    InitResponse {
        #[serde(flatten)]
        usage: UsageReport,
    },

    #[serde(rename_all = "camelCase")]
    UsageResponse {
        #[serde(flatten)]
        usage: UsageReport,
    },

    /// Streaming envelope: one agent event, tagged with the prompt it
    /// belongs to.
    #[serde(rename_all = "camelCase")]
    ResponseChunk {
        user_input_id: String,
        chunk: StreamEvent,
    },

    /// Terminal success for a prompt.
    #[serde(rename_all = "camelCase")]
    PromptResponse {
        prompt_id: String,
        session_state: Box<SessionState>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<AgentOutput>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        #[serde(default)]
        tool_results: Vec<ToolResult>,
    },

    /// Terminal failure for a prompt.
    #[serde(rename_all = "camelCase")]
    PromptError {
        user_input_id: String,
        error: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining_balance: Option<i64>,
    },

    /// Failure for a non-prompt action (or before a prompt id is known).
    #[serde(rename_all = "camelCase")]
    ActionError {
        error: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining_balance: Option<i64>,
    },

    /// RPC: execute a tool on the client and reply with `tool-call-response`
    /// carrying the same `{userInputId, toolCallId}` pair.
    #[serde(rename_all = "camelCase")]
    RequestToolCall {
        user_input_id: String,
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mcp_config: Option<McpServerConfig>,
    },

    /// RPC: read the given files and reply with `files-response`.
    #[serde(rename_all = "camelCase")]
    RequestFiles {
        user_input_id: String,
        file_paths: Vec<String>,
    },
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// One event inside a `response-chunk`.
///
/// Events for a given `agentId` are strictly ordered; events of different
/// agents interleave by arrival. Each stream is bracketed by exactly one
/// `start` and one `finish`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        message_history_length: usize,
    },
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Vec<ToolResultOutput>,
    },
    #[serde(rename_all = "camelCase")]
    SubagentStart {
        agent_id: String,
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SubagentFinish { agent_id: String, agent_type: String },
    /// A sub-agent's own stream event, wrapped so the client can route it
    /// into the agent tree without inspecting the inner payload.
    #[serde(rename_all = "camelCase")]
    SubagentChunk {
        agent_id: String,
        chunk: Box<StreamEvent>,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
    #[serde(rename_all = "camelCase")]
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        total_cost: i64,
    },
}

impl StreamEvent {
    /// The agent this event belongs to, when tagged.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Start { agent_id, .. }
            | Self::Text { agent_id, .. }
            | Self::Reasoning { agent_id, .. }
            | Self::ToolCall { agent_id, .. }
            | Self::Finish { agent_id, .. } => agent_id.as_deref(),
            Self::SubagentStart { agent_id, .. }
            | Self::SubagentFinish { agent_id, .. }
            | Self::SubagentChunk { agent_id, .. } => Some(agent_id.as_str()),
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cancel_user_input_uses_kebab_case_tag() {
        let action = ClientAction::CancelUserInput {
            auth_token: None,
            prompt_id: "p1".into(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "cancel-user-input");
        assert_eq!(v["promptId"], "p1");
    }

    #[test]
    fn prompt_action_parses_with_minimal_fields() {
        let raw = json!({
            "type": "prompt",
            "fingerprintId": "f",
            "promptId": "p1",
            "prompt": "hi",
            "sessionState": {
                "mainAgentState": {
                    "agentId": "a1",
                    "agentType": "coder",
                    "stepsRemaining": 10
                }
            }
        });
        let action: ClientAction = serde_json::from_value(raw).unwrap();
        match action {
            ClientAction::Prompt {
                prompt_id,
                cost_mode,
                prompt,
                ..
            } => {
                assert_eq!(prompt_id, "p1");
                assert_eq!(cost_mode, CostMode::Normal);
                assert_eq!(prompt.as_deref(), Some("hi"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn stream_events_use_snake_case_tags() {
        let ev = StreamEvent::SubagentStart {
            agent_id: "a2".into(),
            agent_type: "researcher".into(),
            parent_agent_id: Some("a1".into()),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "subagent_start");
        assert_eq!(v["parentAgentId"], "a1");
    }

    #[test]
    fn usage_report_keeps_snake_case_reset_field() {
        let report = UsageReport::from_balance(10, &Balance::with_remaining(90), Utc::now());
        let v = serde_json::to_value(&report).unwrap();
        assert!(v.get("next_quota_reset").is_some());
        assert_eq!(v["remainingBalance"], 90);
    }

    #[test]
    fn response_chunk_round_trips() {
        let action = ServerAction::ResponseChunk {
            user_input_id: "p1".into(),
            chunk: StreamEvent::Text {
                text: "hello".into(),
                agent_id: Some("a1".into()),
            },
        };
        let text = serde_json::to_string(&action).unwrap();
        let back: ServerAction = serde_json::from_str(&text).unwrap();
        match back {
            ServerAction::ResponseChunk { user_input_id, chunk } => {
                assert_eq!(user_input_id, "p1");
                assert_eq!(chunk.agent_id(), Some("a1"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn prompt_error_serializes_remaining_balance_when_present() {
        let action = ServerAction::PromptError {
            user_input_id: "p1".into(),
            error: "Insufficient credits".into(),
            message: "You do not have enough credits.".into(),
            remaining_balance: Some(-42),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["remainingBalance"], -42);
        assert_eq!(v["userInputId"], "p1");
    }

    #[test]
    fn request_tool_call_carries_mcp_config() {
        let action = ServerAction::RequestToolCall {
            user_input_id: "p1".into(),
            tool_call_id: "t1".into(),
            tool_name: "docs/search".into(),
            input: json!({"q": "tokio"}),
            mcp_config: Some(McpServerConfig {
                url: Some("https://mcp.example.com".into()),
                ..Default::default()
            }),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "request-tool-call");
        assert_eq!(v["mcpConfig"]["url"], "https://mcp.example.com");
    }
}
