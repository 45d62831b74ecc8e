// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool registry and handlers.
//!
//! Three kinds of tools flow through the same dispatcher:
//! - **server-local** handlers executed in-process (`end_turn`,
//!   `spawn_agents`, `web_search`, ...);
//! - **client-delegated** tools round-tripped over the transport to the
//!   connected client, which owns the project's disk and terminal;
//! - **MCP passthrough** tools (`server/tool` names declared by the agent
//!   template), also executed by the client with the server config attached.
//!
//! Inputs are validated at the boundary by deserializing into each tool's
//! typed input struct; a validation failure becomes an `errorMessage` tool
//! result the model can read and correct, never an error to the caller.

pub mod builtin;
mod bridge;
mod registry;
mod tool;

pub use bridge::{BridgeError, ClientBridge, ToolCallReply};
pub use builtin::builtin_registry;
pub use registry::{Route, ToolRegistry, ToolSchema, ToolScope};
pub use tool::{
    delegate_to_client, parse_input, strip_end_step_flag, HandlerOutcome, SpawnSpec, StateEffect,
    ToolContext, ToolHandler, ToolKind, END_STEP_FLAG,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use otto_config::ToolPricing;
    use otto_proto::{McpServerConfig, StreamEvent, ToolCall, ToolResultOutput};

    use crate::bridge::{BridgeError, ClientBridge, ToolCallReply};
    use crate::tool::ToolContext;

    /// Bridge with no client behind it; every request fails as closed.
    pub struct NullBridge;

    #[async_trait]
    impl ClientBridge for NullBridge {
        async fn send_chunk(&self, _user_input_id: &str, _chunk: StreamEvent) {}

        async fn request_tool_call(
            &self,
            _user_input_id: &str,
            _call: &ToolCall,
            _mcp: Option<&McpServerConfig>,
            _cancel: &CancellationToken,
        ) -> Result<ToolCallReply, BridgeError> {
            Err(BridgeError::Closed("no client in test".into()))
        }

        async fn request_files(
            &self,
            _user_input_id: &str,
            _paths: &[String],
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, String>, BridgeError> {
            Err(BridgeError::Closed("no client in test".into()))
        }
    }

    /// Bridge that records delegated calls and answers each with an ack.
    pub struct RecordingBridge {
        pub calls: Arc<Mutex<Vec<ToolCall>>>,
    }

    #[async_trait]
    impl ClientBridge for RecordingBridge {
        async fn send_chunk(&self, _user_input_id: &str, _chunk: StreamEvent) {}

        async fn request_tool_call(
            &self,
            _user_input_id: &str,
            call: &ToolCall,
            _mcp: Option<&McpServerConfig>,
            _cancel: &CancellationToken,
        ) -> Result<ToolCallReply, BridgeError> {
            self.calls
                .lock()
                .expect("recording bridge poisoned")
                .push(call.clone());
            Ok(ToolCallReply {
                output: vec![ToolResultOutput::json(serde_json::json!({"ok": true}))],
                credits_used: 0,
            })
        }

        async fn request_files(
            &self,
            _user_input_id: &str,
            _paths: &[String],
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, String>, BridgeError> {
            Ok(BTreeMap::new())
        }
    }

    fn context_with(bridge: Arc<dyn ClientBridge>) -> ToolContext {
        ToolContext {
            user_input_id: "p-test".into(),
            agent_id: "agent-test".into(),
            parent_agent_id: None,
            bridge,
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            pricing: ToolPricing::default(),
        }
    }

    pub fn test_context() -> ToolContext {
        context_with(Arc::new(NullBridge))
    }

    pub fn recording_context() -> (ToolContext, Arc<Mutex<Vec<ToolCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let bridge = RecordingBridge {
            calls: Arc::clone(&calls),
        };
        (context_with(Arc::new(bridge)), calls)
    }
}
