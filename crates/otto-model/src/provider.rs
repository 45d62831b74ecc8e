// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ModelChunk, ProviderError};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, ProviderError>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable driver name for logging.
    fn name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    ///
    /// The stream ends with [`ModelChunk::Done`]; a [`ModelChunk::Usage`]
    /// event, when the backend reports one, arrives before it.
    async fn complete(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}
