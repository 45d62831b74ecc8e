// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub tool_pricing: ToolPricing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Socket address the WebSocket server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path to the stored bearer-token file. `None` disables token auth for
    /// self-hosted deployments that front the gateway themselves.
    #[serde(default)]
    pub token_file: Option<std::path::PathBuf>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:4455".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Provider driver. "openai" speaks the OpenAI-compatible wire format
    /// (also used for local proxies); "mock" is the scriptable test driver.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_key_env: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Step budget for a root agent per prompt.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Step budget for spawned sub-agents.
    #[serde(default = "default_subagent_max_steps")]
    pub subagent_max_steps: u32,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_max_steps() -> u32 {
    20
}

fn default_subagent_max_steps() -> u32 {
    8
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            subagent_max_steps: default_subagent_max_steps(),
            retry: RetrySettings::default(),
        }
    }
}

/// Retry policy for transient model-provider failures within one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    250
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
        }
    }
}

// ─── Pricing ──────────────────────────────────────────────────────────────────

/// Credits per million tokens for one model. Integer rates keep the credit
/// ledger exact; partial millions round up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_credits_per_mtok: u64,
    pub output_credits_per_mtok: u64,
}

impl ModelPrice {
    pub const fn new(input: u64, output: u64) -> Self {
        Self {
            input_credits_per_mtok: input,
            output_credits_per_mtok: output,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub models: BTreeMap<String, ModelPrice>,
    /// Fallback for models missing from the table.
    #[serde(default = "default_model_price")]
    pub default: ModelPrice,
}

fn default_model_price() -> ModelPrice {
    ModelPrice::new(300, 1500)
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert("gpt-4o-mini".to_string(), ModelPrice::new(15, 60));
        models.insert("claude-haiku-4-5".to_string(), ModelPrice::new(100, 500));
        models.insert("claude-sonnet-4-5".to_string(), ModelPrice::new(300, 1500));
        models.insert("claude-opus-4-5".to_string(), ModelPrice::new(500, 2500));
        models.insert("gpt-5-preview".to_string(), ModelPrice::new(400, 2000));
        Self {
            models,
            default: default_model_price(),
        }
    }
}

impl PricingConfig {
    fn price_for(&self, model: &str) -> ModelPrice {
        self.models.get(model).copied().unwrap_or(self.default)
    }

    /// Credits for one model call, rounded up so observed tokens are never
    /// under-billed. Zero tokens cost zero.
    pub fn credits_for_usage(&self, model: &str, input_tokens: u64, output_tokens: u64) -> u64 {
        let price = self.price_for(model);
        ceil_per_million(input_tokens, price.input_credits_per_mtok)
            + ceil_per_million(output_tokens, price.output_credits_per_mtok)
    }
}

fn ceil_per_million(tokens: u64, credits_per_mtok: u64) -> u64 {
    if tokens == 0 || credits_per_mtok == 0 {
        return 0;
    }
    (tokens * credits_per_mtok).div_ceil(1_000_000)
}

/// Flat credit prices for the server-side charged tools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolPricing {
    #[serde(default = "default_web_search_standard")]
    pub web_search_standard: u64,
    #[serde(default = "default_web_search_deep")]
    pub web_search_deep: u64,
    #[serde(default = "default_read_docs")]
    pub read_docs: u64,
}

fn default_web_search_standard() -> u64 {
    5
}

fn default_web_search_deep() -> u64 {
    25
}

fn default_read_docs() -> u64 {
    2
}

impl Default for ToolPricing {
    fn default() -> Self {
        Self {
            web_search_standard: default_web_search_standard(),
            web_search_deep: default_web_search_deep(),
            read_docs: default_read_docs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
