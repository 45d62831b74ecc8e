// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Action dispatch for one client session. Prompts run as spawned tasks so
//! the reader loop stays responsive for cancellation and RPC replies; every
//! prompt that passes validation ends in exactly one terminal action.

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use otto_agent::{run_root, AgentDeps, RequestContext};
use otto_proto::{
    ClientAction, ContentPart, ServerAction, SessionState, ToolResult,
};
use otto_tools::ToolCallReply;

use crate::gate::{admit, GateHalt, ERR_INVALID};
use crate::server::Gateway;
use crate::session::ClientSession;

/// Entry point for every decoded client action.
pub async fn handle_action(gateway: &Gateway, session: &Arc<ClientSession>, action: ClientAction) {
    match action {
        ClientAction::Init { auth_token, .. } => {
            match admit(
                auth_token.as_deref(),
                None,
                gateway.users.as_ref(),
                gateway.billing.as_ref(),
            )
            .await
            {
                Ok(admission) => {
                    session
                        .send(ServerAction::InitResponse {
                            usage: admission.usage,
                        })
                        .await;
                }
                Err(halt) => session.send(halt.into_action_error()).await,
            }
        }

        ClientAction::CancelUserInput { prompt_id, .. } => {
            info!(prompt = %prompt_id, "cancel requested");
            session.cancel_prompt(&prompt_id);
        }

        ClientAction::ToolCallResponse {
            tool_call_id,
            output,
            credits_used,
            ..
        } => {
            session.resolve_tool_call(
                &tool_call_id,
                ToolCallReply {
                    output,
                    credits_used: credits_used.unwrap_or(0),
                },
            );
        }

        ClientAction::FilesResponse {
            user_input_id,
            files,
        } => {
            session.resolve_files(&user_input_id, files);
        }

        ClientAction::Prompt {
            auth_token,
            prompt_id,
            prompt,
            content,
            session_state,
            cost_mode,
            agent_id,
            tool_results,
            repo_url,
            ..
        } => {
            let gateway = gateway.clone();
            let session = Arc::clone(session);
            let span = info_span!("prompt", user_input_id = %prompt_id);
            tokio::spawn(
                async move {
                    handle_prompt(
                        gateway,
                        session,
                        auth_token,
                        prompt_id,
                        prompt,
                        content,
                        session_state,
                        cost_mode,
                        agent_id,
                        tool_results.unwrap_or_default(),
                        repo_url,
                    )
                    .await;
                }
                .instrument(span),
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_prompt(
    gateway: Gateway,
    session: Arc<ClientSession>,
    auth_token: Option<String>,
    prompt_id: String,
    prompt: Option<String>,
    content: Option<Vec<ContentPart>>,
    mut session_state: SessionState,
    cost_mode: otto_proto::CostMode,
    agent_id: Option<String>,
    tool_results: Vec<ToolResult>,
    repo_url: Option<String>,
) {
    // Entirely empty prompts are refused before any agent work happens.
    let prompt_empty = prompt.as_deref().map(str::is_empty).unwrap_or(true);
    let content_empty = content.as_deref().map(<[_]>::is_empty).unwrap_or(true);
    if prompt_empty && content_empty {
        session
            .send(
                GateHalt::new(ERR_INVALID, "Prompt must not be empty.")
                    .into_prompt_error(&prompt_id),
            )
            .await;
        return;
    }

    // Gating chain; a halt is the prompt's one terminal action.
    let admission = match admit(
        auth_token.as_deref(),
        repo_url.as_deref(),
        gateway.users.as_ref(),
        gateway.billing.as_ref(),
    )
    .await
    {
        Ok(admission) => admission,
        Err(halt) => {
            session.send(halt.into_prompt_error(&prompt_id)).await;
            return;
        }
    };

    let Some(cancel) = session.register_prompt(&prompt_id) else {
        session
            .send(
                GateHalt::new(ERR_INVALID, "A prompt with this promptId is already running.")
                    .into_prompt_error(&prompt_id),
            )
            .await;
        return;
    };

    // Initial usage snapshot, before the first chunk.
    session
        .send(ServerAction::UsageResponse {
            usage: admission.usage.clone(),
        })
        .await;

    let templates = Arc::new(
        gateway
            .templates
            .with_overrides(&session_state.file_context.agent_templates),
    );
    let template = match templates.resolve(agent_id.as_deref(), cost_mode) {
        Ok(t) => t.clone(),
        Err(e) => {
            session
                .send(GateHalt::new(ERR_INVALID, e.to_string()).into_prompt_error(&prompt_id))
                .await;
            session.finish_prompt(&prompt_id);
            return;
        }
    };

    let (repo_owner, repo_name, org_id) = match &admission.repo {
        Some(grant) => (
            Some(grant.owner.clone()),
            Some(grant.repo.clone()),
            grant.org_id.clone(),
        ),
        None => (None, None, None),
    };
    let ctx = RequestContext {
        client_session_id: session.id.clone(),
        user_input_id: prompt_id.clone(),
        user_id: Some(admission.user.id.clone()),
        user_email: admission.user.email.clone(),
        repo_owner,
        repo_name,
        org_id,
        cancel,
    };

    let deps = AgentDeps {
        provider: Arc::clone(&gateway.provider),
        registry: Arc::clone(&gateway.registry),
        templates,
        bridge: session.clone(),
        billing: Arc::clone(&gateway.billing),
        config: Arc::clone(&gateway.config),
        file_context: Arc::new(session_state.file_context.clone()),
        http: gateway.http.clone(),
        ctx,
    };

    let output = run_root(
        &mut session_state,
        &template,
        prompt,
        content,
        tool_results,
        &deps,
    )
    .await;

    if output.is_error() {
        warn!(prompt = %prompt_id, ?output, "prompt ended with error output");
    }
    session
        .send(ServerAction::PromptResponse {
            prompt_id: prompt_id.clone(),
            session_state: Box::new(session_state),
            output: Some(output),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        })
        .await;
    session.finish_prompt(&prompt_id);
}
