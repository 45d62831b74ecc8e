// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use otto_proto::Message;

/// One streamed event from a model driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// A text delta. May contain inline tool-call markup; the runtime's
    /// parser extracts it.
    Text(String),
    /// A reasoning/thinking delta, forwarded to the client as a distinct
    /// chunk subtype and never parsed for tool calls.
    Reasoning(String),
    /// Final token counts for the call. At most one per stream; absent when
    /// the stream dies early (in which case nothing is billed).
    Usage(TokenUsage),
    /// The stream finished normally.
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Request sent to a model driver. Messages arrive fully assembled (system
/// prompt, file context excerpt, history, step prompt); drivers only
/// translate to their wire format.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
}
