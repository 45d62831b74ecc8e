// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Server-local control tools: they do no I/O, they ask the executor to
//! mutate the agent's state (or to stop).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use otto_proto::{AgentOutput, Role, ToolCall, ToolResultOutput};

use crate::tool::{parse_input, HandlerOutcome, StateEffect, ToolContext, ToolHandler};

// ─── end_turn ─────────────────────────────────────────────────────────────────

pub struct EndTurnTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EndTurnInput {}

#[async_trait]
impl ToolHandler for EndTurnTool {
    fn name(&self) -> &str {
        "end_turn"
    }

    fn description(&self) -> &str {
        "End your turn. Call this when the user's request is fully handled \
         and you are done responding."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn ends_agent_step(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        if let Err(outcome) = parse_input::<EndTurnInput>(call) {
            return outcome;
        }
        HandlerOutcome::effect(StateEffect::EndTurn)
    }
}

// ─── set_output ───────────────────────────────────────────────────────────────

pub struct SetOutputTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetOutputInput {
    output: Value,
}

#[async_trait]
impl ToolHandler for SetOutputTool {
    fn name(&self) -> &str {
        "set_output"
    }

    fn description(&self) -> &str {
        "Record your final structured output and finish. The output value is \
         returned to whoever spawned you."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "output": { "description": "Your final output value (any JSON)" }
            },
            "required": ["output"],
            "additionalProperties": false
        })
    }

    fn ends_agent_step(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        let input: SetOutputInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };
        HandlerOutcome::effect(StateEffect::SetOutput(AgentOutput::Success {
            message: None,
            value: Some(input.output),
        }))
    }
}

// ─── add_message ──────────────────────────────────────────────────────────────

pub struct AddMessageTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddMessageInput {
    role: String,
    content: String,
}

#[async_trait]
impl ToolHandler for AddMessageTool {
    fn name(&self) -> &str {
        "add_message"
    }

    fn description(&self) -> &str {
        "Append a message to your own conversation history. role: 'user' or \
         'assistant'. Useful for leaving yourself notes before a long task."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role": { "type": "string", "enum": ["user", "assistant"] },
                "content": { "type": "string" }
            },
            "required": ["role", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        let input: AddMessageInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };
        let role = match input.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return HandlerOutcome::error(format!(
                    "role must be 'user' or 'assistant', got '{other}'"
                ))
            }
        };
        let mut outcome = HandlerOutcome::effect(StateEffect::AppendMessage {
            role,
            content: input.content,
        });
        outcome.output = vec![ToolResultOutput::json(json!({ "added": true }))];
        outcome
    }
}

// ─── update_subgoal ───────────────────────────────────────────────────────────

pub struct UpdateSubgoalTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateSubgoalInput {
    id: String,
    note: String,
}

#[async_trait]
impl ToolHandler for UpdateSubgoalTool {
    fn name(&self) -> &str {
        "update_subgoal"
    }

    fn description(&self) -> &str {
        "Write or overwrite a named note that persists across your steps. \
         Use it to track subgoals and intermediate findings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Note identifier" },
                "note": { "type": "string", "description": "Note content" }
            },
            "required": ["id", "note"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> HandlerOutcome {
        let input: UpdateSubgoalInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };
        let mut outcome = HandlerOutcome::effect(StateEffect::SetSubgoal {
            id: input.id.clone(),
            note: input.note,
        });
        outcome.output = vec![ToolResultOutput::json(json!({ "updated": input.id }))];
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use serde_json::json;

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall {
            tool_call_id: "t1".into(),
            tool_name: name.into(),
            input,
        }
    }

    #[tokio::test]
    async fn end_turn_produces_end_turn_effect() {
        let ctx = test_context();
        let outcome = EndTurnTool.execute(&call("end_turn", json!({})), &ctx).await;
        assert_eq!(outcome.effect, Some(StateEffect::EndTurn));
        assert!(!outcome.is_error());
    }

    #[tokio::test]
    async fn end_turn_tolerates_the_end_step_flag() {
        let ctx = test_context();
        let outcome = EndTurnTool
            .execute(
                &call("end_turn", json!({ (crate::END_STEP_FLAG): true })),
                &ctx,
            )
            .await;
        assert_eq!(outcome.effect, Some(StateEffect::EndTurn));
    }

    #[tokio::test]
    async fn set_output_records_the_value() {
        let ctx = test_context();
        let outcome = SetOutputTool
            .execute(&call("set_output", json!({"output": {"ok": true}})), &ctx)
            .await;
        match outcome.effect {
            Some(StateEffect::SetOutput(AgentOutput::Success {
                value: Some(v), ..
            })) => assert_eq!(v["ok"], true),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_output_without_output_is_a_validation_error() {
        let ctx = test_context();
        let outcome = SetOutputTool
            .execute(&call("set_output", json!({})), &ctx)
            .await;
        assert!(outcome.is_error());
        assert!(outcome.effect.is_none());
    }

    #[tokio::test]
    async fn add_message_rejects_system_role() {
        let ctx = test_context();
        let outcome = AddMessageTool
            .execute(
                &call("add_message", json!({"role": "system", "content": "x"})),
                &ctx,
            )
            .await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn update_subgoal_produces_effect_and_ack() {
        let ctx = test_context();
        let outcome = UpdateSubgoalTool
            .execute(
                &call("update_subgoal", json!({"id": "g1", "note": "done soon"})),
                &ctx,
            )
            .await;
        assert_eq!(
            outcome.effect,
            Some(StateEffect::SetSubgoal {
                id: "g1".into(),
                note: "done soon".into()
            })
        );
        assert!(!outcome.is_error());
    }
}
