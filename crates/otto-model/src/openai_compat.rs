// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! OpenAI-compatible streaming driver (`/chat/completions`, SSE).
//!
//! This is the one concrete network driver the gateway ships with; it also
//! covers local proxies and routers that speak the same wire format. Tool
//! calls are not negotiated with the backend at all: agents emit inline
//! `<tool:...>` markup in their text, so history entries that carry tool
//! traffic are rendered back into plain text before the request goes out.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use otto_proto::{Message, MessageContent, Role, ToolResultOutput};

use crate::{ChunkStream, CompletionRequest, ModelChunk, ModelProvider, ProviderError, TokenUsage};

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn wire_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let (role, text) = match (&m.role, &m.content) {
                    (Role::System, content) => ("system", render_content(content)),
                    (Role::User, content) => ("user", render_content(content)),
                    (Role::Assistant, content) => ("assistant", render_content(content)),
                    // Tool results go back as user turns: the inline-marker
                    // protocol has no native tool role on the backend side.
                    (Role::Tool, content) => ("user", render_content(content)),
                };
                json!({ "role": role, "content": text })
            })
            .collect()
    }
}

fn render_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                otto_proto::ContentPart::Text { text } => text.clone(),
                otto_proto::ContentPart::Image { .. } => "[attached image]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        MessageContent::ToolCall {
            tool_name, input, ..
        } => format!("<tool:{tool_name} {input}>"),
        MessageContent::ToolResult {
            tool_name, content, ..
        } => {
            let rendered = content
                .iter()
                .map(|o| match o {
                    ToolResultOutput::Json { value } => value.to_string(),
                    ToolResultOutput::Text { text } => text.clone(),
                    ToolResultOutput::Image { .. } => "[image]".to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("[tool result: {tool_name}]\n{rendered}")
        }
    }
}

/// Parse one `data:` SSE payload into at most a few chunks.
fn parse_sse_payload(payload: &str, out: &mut Vec<ModelChunk>) {
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        // Keep-alives and vendor extensions are ignored, never fatal.
        return;
    };
    if let Some(delta) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
    {
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(ModelChunk::Reasoning(text.to_string()));
            }
        }
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(ModelChunk::Text(text.to_string()));
            }
        }
    }
    if let Some(usage) = value.get("usage") {
        let input = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output = usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if input > 0 || output > 0 {
            out.push(ModelChunk::Usage(TokenUsage {
                input_tokens: input,
                output_tokens: output,
            }));
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": req.model,
            "messages": Self::wire_messages(&req.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        debug!(model = %req.model, messages = req.messages.len(), "model request");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut buf = String::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ProviderError::Network(e.to_string()));
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        yield Ok(ModelChunk::Done);
                        break 'outer;
                    }
                    let mut parsed = Vec::new();
                    parse_sse_payload(payload, &mut parsed);
                    for ev in parsed {
                        yield Ok(ev);
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use otto_proto::{ToolCall, ToolResult};
    use serde_json::json;

    #[test]
    fn delta_content_becomes_text_chunk() {
        let mut out = Vec::new();
        parse_sse_payload(
            r#"{"choices":[{"delta":{"content":"hel"}}]}"#,
            &mut out,
        );
        assert_eq!(out, vec![ModelChunk::Text("hel".into())]);
    }

    #[test]
    fn reasoning_content_becomes_reasoning_chunk() {
        let mut out = Vec::new();
        parse_sse_payload(
            r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#,
            &mut out,
        );
        assert_eq!(out, vec![ModelChunk::Reasoning("hmm".into())]);
    }

    #[test]
    fn usage_payload_becomes_usage_chunk() {
        let mut out = Vec::new();
        parse_sse_payload(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
            &mut out,
        );
        assert_eq!(
            out,
            vec![ModelChunk::Usage(TokenUsage {
                input_tokens: 12,
                output_tokens: 3
            })]
        );
    }

    #[test]
    fn garbage_payloads_are_ignored() {
        let mut out = Vec::new();
        parse_sse_payload("not json at all", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn tool_history_renders_back_to_inline_markup() {
        let call = ToolCall {
            tool_call_id: "t1".into(),
            tool_name: "glob".into(),
            input: json!({"pattern": "*.rs"}),
        };
        let messages = vec![
            Message::tool_call(&call),
            Message::tool_result(ToolResult {
                tool_call_id: "t1".into(),
                tool_name: "glob".into(),
                content: vec![ToolResultOutput::json(json!({"files": []}))],
            }),
        ];
        let wire = OpenAiCompatProvider::wire_messages(&messages);
        let assistant = wire[0]["content"].as_str().unwrap();
        assert!(assistant.starts_with("<tool:glob "));
        let tool = wire[1]["content"].as_str().unwrap();
        assert!(tool.starts_with("[tool result: glob]"));
        assert_eq!(wire[1]["role"], "user");
    }
}
