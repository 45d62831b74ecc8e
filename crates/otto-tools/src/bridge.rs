// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use otto_proto::{McpServerConfig, StreamEvent, ToolCall, ToolResultOutput};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("client disconnected: {0}")]
    Closed(String),

    #[error("tool call cancelled")]
    Cancelled,
}

/// A client's reply to a delegated tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolCallReply {
    pub output: Vec<ToolResultOutput>,
    /// Cost reported by an MCP provider; charged to the calling agent.
    pub credits_used: u64,
}

/// The transport seam between the agent runtime and the connected client.
///
/// The gateway implements this over its WebSocket; tests implement it with
/// channels. All replies are routed back by `{user_input_id, tool_call_id}`
/// and the bridge owns that registration table; the runtime never sees it.
#[async_trait]
pub trait ClientBridge: Send + Sync {
    /// Forward one stream event to the client. Infallible from the runtime's
    /// point of view: a gone client simply stops receiving.
    async fn send_chunk(&self, user_input_id: &str, chunk: StreamEvent);

    /// Execute a tool on the client and await its reply.
    async fn request_tool_call(
        &self,
        user_input_id: &str,
        call: &ToolCall,
        mcp: Option<&McpServerConfig>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallReply, BridgeError>;

    /// Ask the client for the contents of the given files.
    async fn request_files(
        &self,
        user_input_id: &str,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, BridgeError>;
}
