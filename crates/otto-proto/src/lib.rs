// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Shared data model and wire protocol for the otto agent gateway.
//!
//! Everything a client and the server exchange lives here: actions in both
//! directions, the streaming chunk envelope, the message-history model, tool
//! calls and results, and the serializable agent/session state that travels
//! with every prompt. The gateway, the agent runtime, and the tool registry
//! all speak these types; none of them defines wire shapes of its own.

pub mod actions;
pub mod message;
pub mod state;
pub mod template;
pub mod usage;

pub use actions::{ClientAction, CostMode, ServerAction, StreamEvent};
pub use message::{
    ContentPart, Message, MessageContent, Role, ToolCall, ToolResult, ToolResultOutput,
};
pub use state::{AgentOutput, AgentState, CustomToolDefinition, ProjectFileContext, SessionState};
pub use template::{AgentTemplate, McpServerConfig, OutputMode};
pub use usage::{Balance, BalanceBreakdown};
