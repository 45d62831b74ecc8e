// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use otto_config::ToolPricing;
use otto_proto::{AgentOutput, McpServerConfig, Role, ToolCall, ToolResultOutput};

use crate::bridge::{BridgeError, ClientBridge};

/// The implicit schema flag advertised on tools that end the agent step.
/// Auto-inserted into the advertised schema and stripped from incoming
/// input before validation.
pub const END_STEP_FLAG: &str = "codebuff_end_step";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ServerLocal,
    ClientDelegated,
}

/// One requested sub-agent inside a `spawn_agents` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnSpec {
    pub agent_type: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A mutation a handler asks the owning step executor to apply.
///
/// Handlers never touch `AgentState` themselves: the state is owned by the
/// executor, and effects are applied in tool-call order when results are
/// collected.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEffect {
    AppendMessage { role: Role, content: String },
    SetSubgoal { id: String, note: String },
    SetOutput(AgentOutput),
    EndTurn,
    /// Yield to the scheduler: run the requested sub-agents, then synthesize
    /// this call's tool result from their outputs.
    Spawn { inline: bool, agents: Vec<SpawnSpec> },
}

/// What a handler produced.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub output: Vec<ToolResultOutput>,
    /// Credits to charge the calling agent; zero for failed calls.
    pub credits_used: u64,
    pub effect: Option<StateEffect>,
}

impl HandlerOutcome {
    pub fn output(output: Vec<ToolResultOutput>) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: vec![ToolResultOutput::error_message(message)],
            ..Default::default()
        }
    }

    pub fn effect(effect: StateEffect) -> Self {
        Self {
            effect: Some(effect),
            ..Default::default()
        }
    }

    pub fn with_credits(mut self, credits: u64) -> Self {
        self.credits_used = credits;
        self
    }

    pub fn is_error(&self) -> bool {
        self.output.iter().any(|o| o.as_error_message().is_some())
    }
}

/// Everything a handler may need, owned so tool tasks can run detached from
/// the executor that spawned them.
#[derive(Clone)]
pub struct ToolContext {
    pub user_input_id: String,
    pub agent_id: String,
    pub parent_agent_id: Option<String>,
    pub bridge: Arc<dyn ClientBridge>,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
    pub pricing: ToolPricing,
}

/// Trait every server-local tool implements.
///
/// Client-delegated tools also implement it: their `execute` forwards the
/// call over the bridge instead of doing local work, so the dispatcher does
/// not special-case them.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input object.
    fn parameters_schema(&self) -> Value;
    /// Whether a call to this tool ends the current agent step.
    fn ends_agent_step(&self) -> bool {
        false
    }
    fn kind(&self) -> ToolKind {
        ToolKind::ServerLocal
    }
    /// Execute the tool. Failures are encoded in the outcome's output
    /// (`errorMessage` shape), never returned as errors.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome;
}

/// Remove the implicit end-step flag from an incoming input object so typed
/// deserialization (with `deny_unknown_fields`) does not trip over it.
pub fn strip_end_step_flag(input: &mut Value) {
    if let Some(obj) = input.as_object_mut() {
        obj.remove(END_STEP_FLAG);
    }
}

/// Deserialize a call's input into the tool's typed input struct.
///
/// This is the schema validation boundary: a failure here becomes a
/// `{type:'json', value:{errorMessage}}` result so the model can correct
/// itself on the next step. Parsing is idempotent: re-validating an already
/// validated input yields the same value.
pub fn parse_input<T: DeserializeOwned>(call: &ToolCall) -> Result<T, HandlerOutcome> {
    let mut input = call.input.clone();
    strip_end_step_flag(&mut input);
    serde_json::from_value(input).map_err(|e| {
        HandlerOutcome::error(format!("invalid input for {}: {e}", call.tool_name))
    })
}

/// Round-trip a call to the connected client and translate the reply.
///
/// Used by every client-delegated tool and by MCP passthrough dispatch.
/// Cancellation surfaces as a plain error result; the executor discards it
/// anyway when the step aborts.
pub async fn delegate_to_client(
    call: &ToolCall,
    ctx: &ToolContext,
    mcp: Option<&McpServerConfig>,
) -> HandlerOutcome {
    match ctx
        .bridge
        .request_tool_call(&ctx.user_input_id, call, mcp, &ctx.cancel)
        .await
    {
        Ok(reply) => HandlerOutcome {
            output: reply.output,
            credits_used: reply.credits_used,
            effect: None,
        },
        Err(BridgeError::Cancelled) => HandlerOutcome::error("tool call cancelled"),
        Err(BridgeError::Closed(msg)) => {
            HandlerOutcome::error(format!("client unavailable: {msg}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
