// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Tool call / result types ─────────────────────────────────────────────────

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Parsed JSON arguments.
    pub input: serde_json::Value,
}

impl ToolCall {
    /// Construct a call with a freshly generated id.
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool_call_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// The reply paired to a [`ToolCall`] by `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ToolResultOutput>,
}

/// One content item in a tool result.
///
/// Most built-in tools produce a single `Json` item; client-executed tools
/// may return text or screenshots as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultOutput {
    Json {
        value: serde_json::Value,
    },
    Text {
        text: String,
    },
    Image {
        /// Data URL (`data:image/png;base64,...`).
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

impl ToolResultOutput {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json { value }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The canonical error shape: `{type:'json', value:{errorMessage}}`.
    ///
    /// Validation and execution failures become tool results of this shape so
    /// the model can read the error and self-correct on its next step.
    pub fn error_message(msg: impl Into<String>) -> Self {
        Self::Json {
            value: serde_json::json!({ "errorMessage": msg.into() }),
        }
    }

    /// Return the embedded error message, if this output carries one.
    pub fn as_error_message(&self) -> Option<&str> {
        match self {
            Self::Json { value } => value.get("errorMessage").and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

// ─── Message history ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content part in a multimodal user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

/// The content of one history entry.
///
/// - `Text` – plain string (most messages)
/// - `Parts` – mixed text + image parts for multimodal user turns
/// - `ToolCall` – the assistant requested a tool invocation
/// - `ToolResult` – the paired result, as a `tool`-role message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        content: Vec<ToolResultOutput>,
    },
}

/// A single message in an agent's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        // A single text part collapses to plain text for cleaner serialization.
        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(parts),
        };
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// The assistant's record of a tool it invoked.
    pub fn tool_call(call: &ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.input.clone(),
            },
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: result.tool_call_id,
                tool_name: result.tool_name,
                content: result.content,
            },
        }
    }

    /// Plain text of this message, when it has exactly one text body.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// The `tool_call_id` this message is about, for either direction.
    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolCall { tool_call_id, .. }
            | MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
