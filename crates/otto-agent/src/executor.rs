// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The step executor: one model call and its accompanying tool calls.
//!
//! The model stream is consumed through the tokenizer; tool-call events
//! dispatch immediately onto a per-step FIFO chain of spawned tasks, so a
//! handler's network round trip overlaps the ongoing stream read while its
//! *observable effect* still happens strictly after the previous handler's.
//! Results are collected in call order when the step ends, then appended to
//! the agent's history together with the assistant message.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use otto_billing::{BillingError, BillingService};
use otto_config::{Config, TemplateRegistry};
use otto_model::{complete_with_retry, CompletionRequest, ModelChunk, ModelProvider};
use otto_proto::{
    AgentOutput, AgentState, AgentTemplate, Message, ProjectFileContext, StreamEvent, ToolCall,
    ToolResult, ToolResultOutput,
};
use otto_tools::{
    delegate_to_client, ClientBridge, HandlerOutcome, Route, SpawnSpec, StateEffect, ToolContext,
    ToolRegistry, ToolScope,
};

use crate::context::RequestContext;
use crate::error::AgentError;
use crate::parser::{ParsedEvent, StreamParser};
use crate::prompts;

/// Shared dependencies for a prompt run. Cheap to clone; sub-agents get a
/// clone and thereby share the cancellation token and the service handles,
/// but never any mutable state.
#[derive(Clone)]
pub struct AgentDeps {
    pub provider: Arc<dyn ModelProvider>,
    pub registry: Arc<ToolRegistry>,
    pub templates: Arc<TemplateRegistry>,
    pub bridge: Arc<dyn ClientBridge>,
    pub billing: Arc<dyn BillingService>,
    pub config: Arc<Config>,
    pub file_context: Arc<ProjectFileContext>,
    pub http: reqwest::Client,
    pub ctx: RequestContext,
}

/// How a step ended, as seen by the agent loop.
#[derive(Debug)]
pub enum StepEnd {
    /// Stream ended with no terminal tool; the loop decides what follows.
    Continue,
    /// `end_turn` fired.
    EndTurn,
    /// The agent recorded a terminal output (or ran out of credits).
    AgentFinished,
    /// A spawn tool fired; the scheduler owns the rest of this call.
    Spawn {
        call: ToolCall,
        inline: bool,
        agents: Vec<SpawnSpec>,
    },
}

#[derive(Debug)]
pub struct StepReport {
    pub end: StepEnd,
    pub had_tool_calls: bool,
}

/// Run exactly one step for `agent`.
///
/// On cancellation the upstream read is aborted, in-flight tool tasks are
/// dropped with their results discarded, and nothing is appended to the
/// history, not even the partial assistant text.
pub async fn run_step(
    agent: &mut AgentState,
    template: &AgentTemplate,
    inherited_system: Option<&str>,
    deps: &AgentDeps,
) -> Result<StepReport, AgentError> {
    let scope = ToolScope {
        template,
        custom_tools: &deps.file_context.custom_tool_definitions,
    };
    let schemas = deps.registry.schemas_for_scope(&scope);
    let messages = prompts::assemble(
        template,
        inherited_system,
        &deps.file_context,
        &schemas,
        &agent.message_history,
    );
    let req = CompletionRequest {
        model: template.model.clone(),
        messages,
    };

    let cancel = deps.ctx.cancel.clone();
    let retry = deps.config.agent.retry;
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AgentError::Aborted),
        opened = complete_with_retry(
            deps.provider.as_ref(),
            &req,
            retry.max_attempts,
            Duration::from_millis(retry.base_delay_ms),
        ) => opened.map_err(AgentError::from)?,
    };

    let ends_step: HashSet<String> = schemas
        .iter()
        .filter(|s| s.ends_agent_step)
        .map(|s| s.name.clone())
        .collect();
    let mut parser = StreamParser::new(ends_step);

    let tool_ctx = ToolContext {
        user_input_id: deps.ctx.user_input_id.clone(),
        agent_id: agent.agent_id.clone(),
        parent_agent_id: agent.parent_id.clone(),
        bridge: Arc::clone(&deps.bridge),
        http: deps.http.clone(),
        cancel: cancel.clone(),
        pricing: deps.config.tool_pricing,
    };

    let agent_tag = Some(agent.agent_id.clone());
    let is_child = agent.parent_id.is_some();
    let agent_id = agent.agent_id.clone();
    let mut assistant_text = String::new();
    let mut usage = None;
    let mut pending: Vec<(ToolCall, JoinHandle<HandlerOutcome>)> = Vec::new();
    let mut prev_gate: Option<oneshot::Receiver<()>> = None;
    let mut incoming: VecDeque<ParsedEvent> = VecDeque::new();
    let mut stream_done = false;

    'step: loop {
        while let Some(event) = incoming.pop_front() {
            match event {
                ParsedEvent::Text(text) => {
                    assistant_text.push_str(&text);
                    deps.bridge
                        .send_chunk(
                            &deps.ctx.user_input_id,
                            envelope(
                                is_child,
                                &agent_id,
                                StreamEvent::Text {
                                    text,
                                    agent_id: agent_tag.clone(),
                                },
                            ),
                        )
                        .await;
                }
                ParsedEvent::Reasoning(text) => {
                    deps.bridge
                        .send_chunk(
                            &deps.ctx.user_input_id,
                            envelope(
                                is_child,
                                &agent_id,
                                StreamEvent::Reasoning {
                                    text,
                                    agent_id: agent_tag.clone(),
                                },
                            ),
                        )
                        .await;
                }
                ParsedEvent::ToolCall(call) => match deps.registry.route(&call.tool_name, &scope) {
                    Route::Denied { message } => {
                        warn!(tool = %call.tool_name, "restricted tool call suppressed");
                        deps.bridge
                            .send_chunk(
                                &deps.ctx.user_input_id,
                                envelope(is_child, &agent_id, StreamEvent::Error { message }),
                            )
                            .await;
                    }
                    route => {
                        deps.bridge
                            .send_chunk(
                                &deps.ctx.user_input_id,
                                envelope(
                                    is_child,
                                    &agent_id,
                                    StreamEvent::ToolCall {
                                        tool_call_id: call.tool_call_id.clone(),
                                        tool_name: call.tool_name.clone(),
                                        input: call.input.clone(),
                                        agent_id: agent_tag.clone(),
                                        parent_agent_id: agent.parent_id.clone(),
                                    },
                                ),
                            )
                            .await;

                        let (gate_tx, gate_rx) = oneshot::channel::<()>();
                        let prev = prev_gate.take();
                        let ctx = tool_ctx.clone();
                        let task_call = call.clone();
                        let handle = tokio::spawn(async move {
                            // FIFO effect chain: wait for the previous tool's
                            // completion gate before doing observable work.
                            if let Some(prev) = prev {
                                let _ = prev.await;
                            }
                            let outcome = match route {
                                Route::Unknown => HandlerOutcome::error(format!(
                                    "unknown tool: {}",
                                    task_call.tool_name
                                )),
                                Route::Builtin(handler) => {
                                    handler.execute(&task_call, &ctx).await
                                }
                                Route::Delegated { mcp } => {
                                    delegate_to_client(&task_call, &ctx, mcp.as_ref()).await
                                }
                                Route::Denied { .. } => {
                                    HandlerOutcome::error("tool not available")
                                }
                            };
                            let _ = gate_tx.send(());
                            outcome
                        });
                        prev_gate = Some(gate_rx);
                        pending.push((call, handle));
                    }
                },
                ParsedEvent::EndStep => break 'step,
            }
        }

        if stream_done {
            break;
        }

        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort_all(pending);
                return Err(AgentError::Aborted);
            }
            chunk = stream.next() => chunk,
        };
        match chunk {
            None => {
                stream_done = true;
                incoming.extend(parser.finish());
            }
            Some(Err(e)) => {
                abort_all(pending);
                return Err(AgentError::from(e));
            }
            Some(Ok(ModelChunk::Text(t))) => incoming.extend(parser.push_text(&t)),
            Some(Ok(ModelChunk::Reasoning(t))) => incoming.extend(parser.push_reasoning(&t)),
            Some(Ok(ModelChunk::Usage(u))) => usage = Some(u),
            Some(Ok(ModelChunk::Done)) => {
                stream_done = true;
                incoming.extend(parser.finish());
            }
        }
    }

    // When a terminal tool ended the step before the stream did, drain the
    // remainder: text after the tool call is discarded, but the provider's
    // usage report must still be observed so the tokens get billed.
    if !stream_done {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(ModelChunk::Usage(u))) => usage = Some(u),
                Some(Ok(ModelChunk::Done)) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    drop(stream);

    // Collect tool outcomes in call order, still cancellable.
    let mut outcomes: Vec<(ToolCall, HandlerOutcome)> = Vec::with_capacity(pending.len());
    let mut queue = pending.into_iter();
    while let Some((call, mut handle)) = queue.next() {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                abort_all(queue.collect());
                return Err(AgentError::Aborted);
            }
            joined = &mut handle => joined.unwrap_or_else(|e| {
                HandlerOutcome::error(format!("tool task panicked: {e}"))
            }),
        };
        outcomes.push((call, outcome));
    }

    let had_tool_calls = !outcomes.is_empty();

    // Append the assistant message, then the tool-call records, then the
    // results in call order; tool messages always land before the agent's
    // next assistant message.
    if !assistant_text.is_empty() {
        agent.message_history.push(Message::assistant(&assistant_text));
    }
    for (call, _) in &outcomes {
        agent.message_history.push(Message::tool_call(call));
    }

    let mut spawn: Option<(ToolCall, bool, Vec<SpawnSpec>)> = None;
    let mut end_turn = false;
    for (call, outcome) in outcomes {
        if let Some(StateEffect::Spawn { inline, agents }) = &outcome.effect {
            // The scheduler synthesizes this call's result after the join.
            spawn = Some((call, *inline, agents.clone()));
            continue;
        }

        if outcome.credits_used > 0 {
            charge_credits(agent, deps, outcome.credits_used).await;
        }

        deps.bridge
            .send_chunk(
                &deps.ctx.user_input_id,
                envelope(
                    is_child,
                    &agent_id,
                    StreamEvent::ToolResult {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        output: outcome.output.clone(),
                    },
                ),
            )
            .await;
        agent.message_history.push(Message::tool_result(ToolResult {
            tool_call_id: call.tool_call_id,
            tool_name: call.tool_name,
            content: outcome.output,
        }));

        match outcome.effect {
            Some(StateEffect::AppendMessage { role, content }) => {
                agent.message_history.push(Message {
                    role,
                    content: otto_proto::MessageContent::Text(content),
                });
            }
            Some(StateEffect::SetSubgoal { id, note }) => {
                agent.subgoals.insert(id, note);
            }
            Some(StateEffect::SetOutput(output)) => {
                agent.output = Some(output);
            }
            Some(StateEffect::EndTurn) => {
                end_turn = true;
            }
            Some(StateEffect::Spawn { .. }) | None => {}
        }
    }

    // Model-token accounting: charge exactly the observed tokens. A stream
    // that died before reporting usage charges nothing.
    if let Some(usage) = usage {
        let credits = deps.config.pricing.credits_for_usage(
            &template.model,
            usage.input_tokens,
            usage.output_tokens,
        );
        if credits > 0 {
            charge_credits(agent, deps, credits).await;
        }
    }

    // A terminal output with a spawn still pending (balance exhausted in the
    // same step) must not leave the spawn call unmatched in the history.
    if agent.output.is_some() {
        if let Some((call, _, _)) = spawn.take() {
            agent.message_history.push(Message::tool_result(ToolResult {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                content: vec![ToolResultOutput::error_message(
                    "agent terminated before sub-agents were spawned",
                )],
            }));
        }
    }

    let end = if agent.output.is_some() {
        StepEnd::AgentFinished
    } else if let Some((call, inline, agents)) = spawn {
        StepEnd::Spawn {
            call,
            inline,
            agents,
        }
    } else if end_turn {
        StepEnd::EndTurn
    } else {
        StepEnd::Continue
    };

    Ok(StepReport {
        end,
        had_tool_calls,
    })
}

fn abort_all(pending: Vec<(ToolCall, JoinHandle<HandlerOutcome>)>) {
    for (_, handle) in pending {
        handle.abort();
    }
}

/// Sub-agent events ride inside a `subagent_chunk` wrapper so the client
/// can route them into its agent tree; root-agent events go out bare.
pub(crate) fn envelope(is_child: bool, agent_id: &str, chunk: StreamEvent) -> StreamEvent {
    if is_child {
        StreamEvent::SubagentChunk {
            agent_id: agent_id.to_string(),
            chunk: Box::new(chunk),
        }
    } else {
        chunk
    }
}

/// Record a debit on the agent and push it to the billing backend. When the
/// principal is exhausted the agent gets a fatal error output (unless it
/// already finished successfully); billing outages are logged, not fatal.
async fn charge_credits(agent: &mut AgentState, deps: &AgentDeps, credits: u64) {
    agent.add_direct_credits(credits);
    let Some(principal) = deps.ctx.principal() else {
        return;
    };
    match deps.billing.consume_credits(&principal, credits).await {
        Ok(()) => {}
        Err(BillingError::Insufficient { remaining }) => {
            warn!(remaining, "credit balance exhausted mid-run");
            if agent.output.is_none() {
                agent.output = Some(AgentOutput::error(
                    "insufficient credits: your balance is exhausted",
                ));
            }
        }
        Err(e) => warn!("billing backend error (continuing): {e}"),
    }
}
