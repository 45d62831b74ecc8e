// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use otto_proto::{ToolCall, ToolResultOutput};

use crate::tool::{parse_input, HandlerOutcome, ToolContext, ToolHandler};

/// Fetch curated library documentation from the configured docs service.
/// Flat-rate charged per successful call.
#[derive(Default)]
pub struct ReadDocsTool {
    /// Docs service endpoint; `None` disables the tool with a config error.
    pub base_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadDocsInput {
    #[serde(rename = "libraryTitle")]
    library_title: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    max_tokens: Option<u64>,
}

#[async_trait]
impl ToolHandler for ReadDocsTool {
    fn name(&self) -> &str {
        "read_docs"
    }

    fn description(&self) -> &str {
        "Look up current documentation for a library. Prefer this over \
         web_search for API details."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "libraryTitle": { "type": "string", "description": "e.g. 'tokio'" },
                "topic": { "type": "string", "description": "Narrow to one topic" },
                "max_tokens": { "type": "integer" }
            },
            "required": ["libraryTitle"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        let input: ReadDocsInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };

        let Some(base_url) = &self.base_url else {
            return HandlerOutcome::error(
                "No docs service configured. Set model.docs_base_url in otto config.",
            );
        };

        debug!(library = %input.library_title, topic = ?input.topic, "read_docs tool");

        let mut url = format!(
            "{}/v1/docs?library={}",
            base_url.trim_end_matches('/'),
            input.library_title
        );
        if let Some(topic) = &input.topic {
            url.push_str(&format!("&topic={topic}"));
        }
        if let Some(max) = input.max_tokens {
            url.push_str(&format!("&max_tokens={max}"));
        }

        let resp = match ctx.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return HandlerOutcome::error(format!("docs fetch failed: {e}")),
        };
        if !resp.status().is_success() {
            return HandlerOutcome::error(format!(
                "docs service returned status {}",
                resp.status()
            ));
        }
        match resp.text().await {
            Ok(text) => HandlerOutcome::output(vec![ToolResultOutput::text(text)])
                .with_credits(ctx.pricing.read_docs),
            Err(e) => HandlerOutcome::error(format!("docs fetch failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[tokio::test]
    async fn unconfigured_docs_service_is_an_error_with_no_charge() {
        let tool = ReadDocsTool { base_url: None };
        let ctx = test_context();
        let call = ToolCall {
            tool_call_id: "1".into(),
            tool_name: "read_docs".into(),
            input: json!({"libraryTitle": "tokio"}),
        };
        let outcome = tool.execute(&call, &ctx).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.credits_used, 0);
    }

    #[tokio::test]
    async fn library_title_is_required() {
        let tool = ReadDocsTool {
            base_url: Some("https://docs.example".into()),
        };
        let ctx = test_context();
        let call = ToolCall {
            tool_call_id: "1".into(),
            tool_name: "read_docs".into(),
            input: json!({"topic": "streams"}),
        };
        let outcome = tool.execute(&call, &ctx).await;
        assert!(outcome.is_error());
    }
}
