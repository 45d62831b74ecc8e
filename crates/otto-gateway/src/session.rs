// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-connection state: the outgoing action channel, the pending-RPC
//! routing tables, and the registry of active prompts with their
//! cancellation tokens.
//!
//! `ClientSession` is the gateway's implementation of the runtime's
//! [`ClientBridge`] seam: stream chunks become `response-chunk` frames, and
//! delegated tool calls become `request-tool-call` RPCs whose replies are
//! routed back by `toolCallId`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use otto_proto::{McpServerConfig, ServerAction, StreamEvent, ToolCall};
use otto_tools::{BridgeError, ClientBridge, ToolCallReply};

pub struct ClientSession {
    pub id: String,
    outgoing: mpsc::Sender<ServerAction>,
    /// Pending delegated tool calls, keyed by `tool_call_id`.
    pending_calls: DashMap<String, oneshot::Sender<ToolCallReply>>,
    /// Pending file requests, keyed by `user_input_id`.
    pending_files: DashMap<String, oneshot::Sender<BTreeMap<String, String>>>,
    /// Active prompts and their cancellation tokens, keyed by
    /// `user_input_id`. Registered on prompt start, removed on the terminal
    /// action.
    active_prompts: DashMap<String, CancellationToken>,
}

impl ClientSession {
    pub fn new(outgoing: mpsc::Sender<ServerAction>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            outgoing,
            pending_calls: DashMap::new(),
            pending_files: DashMap::new(),
            active_prompts: DashMap::new(),
        })
    }

    /// Queue an action for the writer task. A gone client drops frames.
    pub async fn send(&self, action: ServerAction) {
        if self.outgoing.send(action).await.is_err() {
            debug!(session = %self.id, "client gone; dropping action");
        }
    }

    /// Register a prompt. Returns `None` when the id is already running.
    pub fn register_prompt(&self, user_input_id: &str) -> Option<CancellationToken> {
        if self.active_prompts.contains_key(user_input_id) {
            return None;
        }
        let token = CancellationToken::new();
        self.active_prompts
            .insert(user_input_id.to_string(), token.clone());
        Some(token)
    }

    pub fn finish_prompt(&self, user_input_id: &str) {
        self.active_prompts.remove(user_input_id);
    }

    /// Fire a prompt's cancellation token. Unknown ids and repeated cancels
    /// are no-ops.
    pub fn cancel_prompt(&self, user_input_id: &str) {
        match self.active_prompts.get(user_input_id) {
            Some(token) => token.cancel(),
            None => debug!(prompt = user_input_id, "cancel for inactive prompt ignored"),
        }
    }

    /// Cancel everything. Used when the connection drops so no agent tree
    /// keeps streaming into the void.
    pub fn cancel_all(&self) {
        for entry in self.active_prompts.iter() {
            entry.value().cancel();
        }
    }

    /// Route a client's tool-call reply to whoever is waiting on it.
    pub fn resolve_tool_call(&self, tool_call_id: &str, reply: ToolCallReply) {
        match self.pending_calls.remove(tool_call_id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => warn!(tool_call_id, "tool-call reply with no pending request"),
        }
    }

    pub fn resolve_files(&self, user_input_id: &str, files: BTreeMap<String, String>) {
        match self.pending_files.remove(user_input_id) {
            Some((_, tx)) => {
                let _ = tx.send(files);
            }
            None => warn!(user_input_id, "files reply with no pending request"),
        }
    }
}

#[async_trait]
impl ClientBridge for ClientSession {
    async fn send_chunk(&self, user_input_id: &str, chunk: StreamEvent) {
        self.send(ServerAction::ResponseChunk {
            user_input_id: user_input_id.to_string(),
            chunk,
        })
        .await;
    }

    async fn request_tool_call(
        &self,
        user_input_id: &str,
        call: &ToolCall,
        mcp: Option<&McpServerConfig>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallReply, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.pending_calls.insert(call.tool_call_id.clone(), tx);
        self.send(ServerAction::RequestToolCall {
            user_input_id: user_input_id.to_string(),
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            mcp_config: mcp.cloned(),
        })
        .await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            reply = rx => reply.map_err(|_| BridgeError::Closed("reply channel dropped".into())),
        };
        // Unregister on every exit path so the table never leaks entries.
        self.pending_calls.remove(&call.tool_call_id);
        result
    }

    async fn request_files(
        &self,
        user_input_id: &str,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.pending_files.insert(user_input_id.to_string(), tx);
        self.send(ServerAction::RequestFiles {
            user_input_id: user_input_id.to_string(),
            file_paths: paths.to_vec(),
        })
        .await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            reply = rx => reply.map_err(|_| BridgeError::Closed("reply channel dropped".into())),
        };
        self.pending_files.remove(user_input_id);
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use otto_proto::ToolResultOutput;
    use serde_json::json;

    fn session() -> (Arc<ClientSession>, mpsc::Receiver<ServerAction>) {
        let (tx, rx) = mpsc::channel(64);
        (ClientSession::new(tx), rx)
    }

    #[tokio::test]
    async fn duplicate_prompt_registration_is_rejected() {
        let (session, _rx) = session();
        assert!(session.register_prompt("p1").is_some());
        assert!(session.register_prompt("p1").is_none());
        session.finish_prompt("p1");
        assert!(session.register_prompt("p1").is_some());
    }

    #[tokio::test]
    async fn cancel_fires_the_registered_token_and_is_idempotent() {
        let (session, _rx) = session();
        let token = session.register_prompt("p1").unwrap();
        assert!(!token.is_cancelled());
        session.cancel_prompt("p1");
        assert!(token.is_cancelled());
        // Repeats and unknown ids are no-ops.
        session.cancel_prompt("p1");
        session.cancel_prompt("p-unknown");
    }

    #[tokio::test]
    async fn tool_call_round_trip_routes_by_call_id() {
        let (session, mut rx) = session();
        let cancel = CancellationToken::new();
        let call = ToolCall {
            tool_call_id: "tc-1".into(),
            tool_name: "glob".into(),
            input: json!({"pattern": "*"}),
        };

        let responder = Arc::clone(&session);
        let replier = tokio::spawn(async move {
            // Play the client: wait for the RPC, reply with the same id.
            match rx.recv().await {
                Some(ServerAction::RequestToolCall { tool_call_id, .. }) => {
                    responder.resolve_tool_call(
                        &tool_call_id,
                        ToolCallReply {
                            output: vec![ToolResultOutput::json(json!({"files": []}))],
                            credits_used: 0,
                        },
                    );
                }
                other => panic!("expected request-tool-call, got {other:?}"),
            }
        });

        let reply = session
            .request_tool_call("p1", &call, None, &cancel)
            .await
            .unwrap();
        assert_eq!(reply.output.len(), 1);
        replier.await.unwrap();
        assert!(session.pending_calls.is_empty());
    }

    #[tokio::test]
    async fn cancelled_tool_call_unregisters_and_errors() {
        let (session, _rx) = session();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let call = ToolCall {
            tool_call_id: "tc-2".into(),
            tool_name: "glob".into(),
            input: json!({}),
        };
        let err = session
            .request_tool_call("p1", &call, None, &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Cancelled));
        assert!(session.pending_calls.is_empty());
    }

    #[tokio::test]
    async fn unmatched_replies_are_ignored() {
        let (session, _rx) = session();
        session.resolve_tool_call(
            "never-requested",
            ToolCallReply {
                output: vec![],
                credits_used: 0,
            },
        );
    }
}
