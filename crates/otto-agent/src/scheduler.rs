// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The agent loop and the sub-agent scheduler.
//!
//! The loop runs steps until a terminal tool fires, the step budget runs
//! out, or cancellation trips. Spawned sub-agents run as parallel tasks in
//! a `JoinSet`; each owns its own state, shares only the cancellation token
//! with its siblings, and reports back through the join. The parent's
//! state is only touched by the parent's own task, at join time.

use async_recursion::async_recursion;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use otto_proto::{
    AgentOutput, AgentState, AgentTemplate, ContentPart, Message, OutputMode, SessionState,
    StreamEvent, ToolCall, ToolResult, ToolResultOutput,
};
use otto_tools::SpawnSpec;

use crate::error::AgentError;
use crate::executor::{run_step, AgentDeps, StepEnd};

/// Drive one agent to termination. On return `agent.output` is always set.
#[async_recursion]
pub async fn run_agent(
    agent: &mut AgentState,
    template: &AgentTemplate,
    inherited_system: Option<String>,
    deps: &AgentDeps,
) {
    loop {
        if deps.ctx.cancel.is_cancelled() {
            if agent.output.is_none() {
                agent.output = Some(AgentOutput::error("aborted"));
            }
            return;
        }
        if agent.steps_remaining == 0 {
            agent.output = Some(AgentOutput::error("step budget exhausted"));
            return;
        }
        agent.steps_remaining -= 1;

        let report = match run_step(agent, template, inherited_system.as_deref(), deps).await {
            Ok(report) => report,
            Err(AgentError::Aborted) => {
                agent.output = Some(AgentOutput::error("aborted"));
                return;
            }
            Err(AgentError::Provider(e)) => {
                warn!(agent = %agent.agent_id, "model call failed: {e}");
                agent.output = Some(AgentOutput::error(format!("model call failed: {e}")));
                return;
            }
            Err(AgentError::Fatal(msg)) => {
                agent.output = Some(AgentOutput::error(msg));
                return;
            }
        };

        match report.end {
            StepEnd::AgentFinished => return,
            StepEnd::EndTurn => {
                finish_turn(agent, template);
                return;
            }
            StepEnd::Continue => {
                // A step with neither tool calls nor a terminal tool is the
                // model's way of saying it is done talking.
                if !report.had_tool_calls {
                    finish_turn(agent, template);
                    return;
                }
            }
            StepEnd::Spawn {
                call,
                inline,
                agents,
            } => {
                run_spawn(agent, template, call, inline, agents, deps).await;
                if agent.output.is_some() {
                    return;
                }
            }
        }
    }
}

/// Derive the terminal output for an agent that ended its turn without
/// `set_output`.
fn finish_turn(agent: &mut AgentState, template: &AgentTemplate) {
    if agent.output.is_some() {
        return;
    }
    agent.output = Some(match template.output_mode {
        OutputMode::StructuredOutput => {
            AgentOutput::error("agent finished without calling set_output")
        }
        OutputMode::LastMessage | OutputMode::AllMessages => AgentOutput::Success {
            message: agent.last_assistant_text().map(str::to_string),
            value: None,
        },
    });
}

struct ChildSlot {
    agent_type: String,
    /// Set when the spec failed validation and no child ever ran.
    error: Option<String>,
    /// `(seed_len, final_state)`; `seed_len` marks where the child's own
    /// messages begin when it was seeded with the parent's history.
    done: Option<(usize, AgentState)>,
}

/// Run all children of one spawn call in parallel, join them in spawn
/// order, roll up their cost, and synthesize the pending tool result.
async fn run_spawn(
    parent: &mut AgentState,
    parent_template: &AgentTemplate,
    call: ToolCall,
    inline: bool,
    agents: Vec<SpawnSpec>,
    deps: &AgentDeps,
) {
    let mut slots: Vec<ChildSlot> = agents
        .iter()
        .map(|spec| ChildSlot {
            agent_type: spec.agent_type.clone(),
            error: None,
            done: None,
        })
        .collect();

    let mut join_set: JoinSet<(usize, usize, AgentState)> = JoinSet::new();

    for (index, spec) in agents.into_iter().enumerate() {
        if !parent_template.spawnable_agents.contains(&spec.agent_type) {
            slots[index].error = Some(format!(
                "agent type '{}' is not spawnable by this agent",
                spec.agent_type
            ));
            continue;
        }
        let Some(template) = deps.templates.get(&spec.agent_type) else {
            slots[index].error = Some(format!("unknown agent template '{}'", spec.agent_type));
            continue;
        };
        let template = template.clone();

        let mut child = AgentState::child_of(
            parent,
            &spec.agent_type,
            deps.config.agent.subagent_max_steps,
        );
        let mut seed_len = 0;
        if template.include_message_history {
            child.message_history = parent.message_history.clone();
            seed_len = child.message_history.len();
        }
        let prompt = spec.prompt.clone().unwrap_or_default();
        if !prompt.is_empty() {
            child.message_history.push(Message::user(prompt));
        } else if let Some(params) = &spec.params {
            child.message_history.push(Message::user(params.to_string()));
        }

        deps.bridge
            .send_chunk(
                &deps.ctx.user_input_id,
                StreamEvent::SubagentStart {
                    agent_id: child.agent_id.clone(),
                    agent_type: spec.agent_type.clone(),
                    parent_agent_id: Some(parent.agent_id.clone()),
                },
            )
            .await;
        info!(
            parent = %parent.agent_id,
            child = %child.agent_id,
            agent_type = %spec.agent_type,
            "sub-agent spawned"
        );

        let inherited = template
            .inherit_parent_system_prompt
            .then(|| parent_template.system_prompt.clone());
        let task_deps = deps.clone();
        join_set.spawn(async move {
            let mut child = child;
            run_agent(&mut child, &template, inherited, &task_deps).await;
            (index, seed_len, child)
        });
    }

    // Await ALL children, also under cancellation, so no tool handler of a
    // child can outlive the parent's return.
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, seed_len, child)) => {
                deps.bridge
                    .send_chunk(
                        &deps.ctx.user_input_id,
                        StreamEvent::SubagentFinish {
                            agent_id: child.agent_id.clone(),
                            agent_type: child.agent_type.clone(),
                        },
                    )
                    .await;
                slots[index].done = Some((seed_len, child));
            }
            Err(e) => warn!("sub-agent task failed: {e}"),
        }
    }

    // Synthesize one result ordered by spawn index, regardless of finish
    // order, and roll each child's total into the parent's roll-up counter.
    let mut outputs: Vec<Value> = Vec::with_capacity(slots.len());
    for slot in &slots {
        if let Some(message) = &slot.error {
            outputs.push(json!({
                "agentType": slot.agent_type,
                "output": { "type": "error", "message": message },
            }));
            continue;
        }
        match &slot.done {
            Some((_, child)) => {
                parent.add_child_credits(child.credits_used);
                let output = child
                    .output
                    .clone()
                    .unwrap_or_else(|| AgentOutput::error("sub-agent produced no output"));
                outputs.push(json!({
                    "agentId": child.agent_id,
                    "agentType": child.agent_type,
                    "output": serde_json::to_value(&output).unwrap_or(Value::Null),
                }));
            }
            None => outputs.push(json!({
                "agentType": slot.agent_type,
                "output": { "type": "error", "message": "sub-agent task failed" },
            })),
        }
    }

    let content = vec![ToolResultOutput::json(Value::Array(outputs))];
    deps.bridge
        .send_chunk(
            &deps.ctx.user_input_id,
            crate::executor::envelope(
                parent.parent_id.is_some(),
                &parent.agent_id,
                StreamEvent::ToolResult {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    output: content.clone(),
                },
            ),
        )
        .await;
    parent.message_history.push(Message::tool_result(ToolResult {
        tool_call_id: call.tool_call_id,
        tool_name: call.tool_name,
        content,
    }));

    // Inline spawning may additionally splice the child's own conversation
    // into the parent's, when the child's template exposes all messages.
    if inline {
        if let Some(slot) = slots.into_iter().next() {
            if let Some((seed_len, child)) = slot.done {
                let exposes_all = deps
                    .templates
                    .get(&child.agent_type)
                    .map(|t| t.output_mode == OutputMode::AllMessages)
                    .unwrap_or(false);
                if exposes_all {
                    parent
                        .message_history
                        .extend(child.message_history.into_iter().skip(seed_len));
                }
            }
        }
    }
}

/// Run the root agent for one prompt: reset server-authoritative counters,
/// apply out-of-band tool results, append the user message, drive the loop,
/// and bracket the stream with `start`/`finish` chunks.
pub async fn run_root(
    session: &mut SessionState,
    template: &AgentTemplate,
    prompt: Option<String>,
    content: Option<Vec<ContentPart>>,
    out_of_band_results: Vec<ToolResult>,
    deps: &AgentDeps,
) -> AgentOutput {
    let agent = &mut session.main_agent_state;
    agent.agent_type = template.id.clone();
    // Server truth: whatever the client sent in these counters is ignored.
    agent.reset_credit_counters();
    agent.output = None;
    agent.steps_remaining = deps.config.agent.max_steps;

    for result in out_of_band_results {
        agent.message_history.push(Message::tool_result(result));
    }

    deps.bridge
        .send_chunk(
            &deps.ctx.user_input_id,
            StreamEvent::Start {
                agent_id: Some(agent.agent_id.clone()),
                message_history_length: agent.message_history.len(),
            },
        )
        .await;

    let mut parts: Vec<ContentPart> = Vec::new();
    if let Some(text) = prompt {
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
    }
    if let Some(extra) = content {
        parts.extend(extra);
    }
    if !parts.is_empty() {
        agent.message_history.push(Message::user_with_parts(parts));
    }

    run_agent(agent, template, None, deps).await;

    let output = agent
        .output
        .clone()
        .unwrap_or_else(|| AgentOutput::error("agent ended without output"));
    info!(
        agent = %agent.agent_id,
        credits = agent.credits_used,
        "prompt finished"
    );
    deps.bridge
        .send_chunk(
            &deps.ctx.user_input_id,
            StreamEvent::Finish {
                agent_id: Some(agent.agent_id.clone()),
                total_cost: agent.credits_used as i64,
            },
        )
        .await;
    output
}
