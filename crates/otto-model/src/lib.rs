// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! LLM provider abstraction for the agent runtime.
//!
//! The step executor consumes a stream of [`ModelChunk`]s; tool calls are
//! *not* parsed here; they travel inline in the text and are extracted by
//! the runtime's stream parser. This keeps every provider driver a dumb
//! pipe: text deltas, reasoning deltas, one usage report, done.

mod error;
mod mock;
mod openai_compat;
mod provider;
mod retry;
mod types;

pub use error::ProviderError;
pub use mock::{MockProvider, MockTurn};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ChunkStream, ModelProvider};
pub use retry::complete_with_retry;
pub use types::{CompletionRequest, ModelChunk, TokenUsage};
