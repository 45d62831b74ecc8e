// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Scriptable mock driver, used by the test suite and by `otto serve --mock`
//! for offline smoke runs.
//!
//! Turns are either queued (popped in call order) or routed by a substring
//! match against the request's last user message, which makes multi-agent
//! tests deterministic: concurrent sub-agents each get the turn scripted for
//! their own prompt regardless of scheduling order.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use otto_proto::{MessageContent, Role};

use crate::{ChunkStream, CompletionRequest, ModelChunk, ModelProvider, ProviderError};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    /// Simulated model latency before the first chunk.
    pub delay: Duration,
    pub chunks: Vec<ModelChunk>,
}

impl MockTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            chunks: vec![ModelChunk::Text(text.into())],
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.chunks.push(ModelChunk::Usage(crate::TokenUsage {
            input_tokens,
            output_tokens,
        }));
        self
    }
}

#[derive(Default)]
pub struct MockProvider {
    queue: Mutex<VecDeque<MockTurn>>,
    /// `(substring, turns)`: first route whose substring appears in the
    /// request's last user message wins.
    routes: Mutex<Vec<(String, VecDeque<MockTurn>)>>,
    /// Every request this provider has served, for assertions.
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn served to the next unrouted request.
    pub fn push_turn(&self, turn: MockTurn) {
        self.queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(turn);
    }

    /// Script turns for requests whose last user message contains `needle`.
    pub fn route(&self, needle: impl Into<String>, turns: Vec<MockTurn>) {
        self.routes
            .lock()
            .expect("mock routes poisoned")
            .push((needle.into(), turns.into()));
    }

    fn next_turn_for(&self, req: &CompletionRequest) -> Option<MockTurn> {
        let last_user_text = req
            .messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .find_map(|m| match &m.content {
                MessageContent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap_or_default();

        {
            let mut routes = self.routes.lock().expect("mock routes poisoned");
            for (needle, turns) in routes.iter_mut() {
                if last_user_text.contains(needle.as_str()) {
                    if let Some(turn) = turns.pop_front() {
                        return Some(turn);
                    }
                }
            }
        }
        self.queue.lock().expect("mock queue poisoned").pop_front()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let turn = self.next_turn_for(&req);
        self.requests
            .lock()
            .expect("mock requests poisoned")
            .push(req);

        let Some(turn) = turn else {
            return Err(ProviderError::Exhausted);
        };

        let mut chunks: Vec<Result<ModelChunk, ProviderError>> =
            turn.chunks.into_iter().map(Ok).collect();
        chunks.push(Ok(ModelChunk::Done));

        if turn.delay.is_zero() {
            Ok(Box::pin(stream::iter(chunks)))
        } else {
            let delay = turn.delay;
            Ok(Box::pin(async_stream::stream! {
                tokio::time::sleep(delay).await;
                for chunk in chunks {
                    yield chunk;
                }
            }))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use otto_proto::Message;

    use super::*;

    fn req_with_prompt(text: &str) -> CompletionRequest {
        CompletionRequest {
            model: "mock".into(),
            messages: vec![Message::user(text)],
        }
    }

    async fn collect(stream: ChunkStream) -> Vec<ModelChunk> {
        stream.map(|c| c.unwrap()).collect().await
    }

    #[tokio::test]
    async fn queued_turns_pop_in_order() {
        let mock = MockProvider::new();
        mock.push_turn(MockTurn::text("first"));
        mock.push_turn(MockTurn::text("second"));

        let a = collect(mock.complete(req_with_prompt("x")).await.unwrap()).await;
        let b = collect(mock.complete(req_with_prompt("x")).await.unwrap()).await;
        assert_eq!(a[0], ModelChunk::Text("first".into()));
        assert_eq!(b[0], ModelChunk::Text("second".into()));
    }

    #[tokio::test]
    async fn routed_turns_match_last_user_message() {
        let mock = MockProvider::new();
        mock.route("alpha", vec![MockTurn::text("ra")]);
        mock.route("beta", vec![MockTurn::text("rb")]);

        let b = collect(mock.complete(req_with_prompt("task beta")).await.unwrap()).await;
        let a = collect(mock.complete(req_with_prompt("task alpha")).await.unwrap()).await;
        assert_eq!(a[0], ModelChunk::Text("ra".into()));
        assert_eq!(b[0], ModelChunk::Text("rb".into()));
    }

    #[tokio::test]
    async fn exhausted_script_is_a_typed_error() {
        let mock = MockProvider::new();
        let err = mock.complete(req_with_prompt("x")).await.err().unwrap();
        assert!(matches!(err, ProviderError::Exhausted));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn every_stream_ends_with_done() {
        let mock = MockProvider::new();
        mock.push_turn(MockTurn::text("t").with_usage(5, 7));
        let chunks = collect(mock.complete(req_with_prompt("x")).await.unwrap()).await;
        assert_eq!(chunks.last(), Some(&ModelChunk::Done));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockProvider::new();
        mock.push_turn(MockTurn::text("t"));
        let _ = mock.complete(req_with_prompt("hello")).await.unwrap();
        assert_eq!(mock.requests.lock().unwrap().len(), 1);
    }
}
