// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use otto_proto::{ToolCall, ToolResultOutput};

use crate::tool::{parse_input, HandlerOutcome, ToolContext, ToolHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    #[default]
    Standard,
    Deep,
}

/// Server-side web search, charged per call (deep costs more). Credits are
/// only billed when the search succeeds.
#[derive(Default)]
pub struct WebSearchTool {
    /// Optional API key override (falls back to env BRAVE_API_KEY).
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WebSearchInput {
    query: String,
    #[serde(default)]
    depth: SearchDepth,
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Real-time web search. depth 'standard' returns the top results; \
         'deep' fans out wider and costs more credits. Cite sources after \
         answering."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "depth": { "type": "string", "enum": ["standard", "deep"] }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        let input: WebSearchInput = match parse_input(call) {
            Ok(i) => i,
            Err(outcome) => return outcome,
        };

        let (count, credits) = match input.depth {
            SearchDepth::Standard => (8usize, ctx.pricing.web_search_standard),
            SearchDepth::Deep => (20usize, ctx.pricing.web_search_deep),
        };

        debug!(query = %input.query, ?input.depth, "web_search tool");

        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok());
        let Some(api_key) = api_key else {
            return HandlerOutcome::error(
                "No search API key configured. Set the BRAVE_API_KEY environment \
                 variable or configure model.search in otto config.",
            );
        };

        match brave_search(&ctx.http, &input.query, count, &api_key).await {
            Ok(results) => {
                HandlerOutcome::output(vec![ToolResultOutput::text(results)]).with_credits(credits)
            }
            // Failed calls never charge tool credits.
            Err(e) => HandlerOutcome::error(format!("search error: {e}")),
        }
    }
}

async fn brave_search(
    http: &reqwest::Client,
    query: &str,
    count: usize,
    api_key: &str,
) -> anyhow::Result<String> {
    let url = format!(
        "https://api.search.brave.com/res/v1/web/search?q={}&count={}",
        urlencode(query),
        count
    );

    let resp = http
        .get(&url)
        .header("Accept", "application/json")
        .header("X-Subscription-Token", api_key)
        .send()
        .await?;

    if !resp.status().is_success() {
        anyhow::bail!("search API returned status {}", resp.status());
    }

    let body: Value = resp.json().await?;
    let results = body
        .get("web")
        .and_then(|w| w.get("results"))
        .and_then(|r| r.as_array())
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    if results.is_empty() {
        return Ok("(no results)".to_string());
    }

    let mut output = Vec::new();
    for (i, r) in results.iter().enumerate().take(count) {
        let title = r
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("(no title)");
        let url = r.get("url").and_then(|v| v.as_str()).unwrap_or("");
        let desc = r.get("description").and_then(|v| v.as_str()).unwrap_or("");
        output.push(format!("{}. **{}**\n   {}\n   {}", i + 1, title, url, desc));
    }
    Ok(output.join("\n\n"))
}

fn urlencode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            ' ' => encoded.push('+'),
            c => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[test]
    fn schema_requires_query() {
        let schema = WebSearchTool::default().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("query")));
    }

    #[tokio::test]
    async fn missing_api_key_is_an_error_with_no_charge() {
        std::env::remove_var("BRAVE_API_KEY");
        let tool = WebSearchTool { api_key: None };
        let ctx = test_context();
        let call = ToolCall {
            tool_call_id: "1".into(),
            tool_name: "web_search".into(),
            input: json!({"query": "tokio select"}),
        };
        let outcome = tool.execute(&call, &ctx).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.credits_used, 0);
    }

    #[tokio::test]
    async fn unknown_depth_is_a_validation_error() {
        let tool = WebSearchTool::default();
        let ctx = test_context();
        let call = ToolCall {
            tool_call_id: "1".into(),
            tool_name: "web_search".into(),
            input: json!({"query": "x", "depth": "extreme"}),
        };
        let outcome = tool.execute(&call, &ctx).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.credits_used, 0);
    }

    #[test]
    fn urlencode_escapes_reserved_chars() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
    }
}
