// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use tracing::warn;

use crate::{ChunkStream, CompletionRequest, ModelProvider, ProviderError};

/// Open a completion stream, retrying transient failures with exponential
/// backoff. Retry is a loop over the typed error, not a catch: fatal
/// variants return immediately, and the final transient error is returned
/// once `max_attempts` is exhausted.
///
/// Only the *opening* of the stream is retried here. A stream that dies
/// mid-read is not resumable: the step ends with a provider error and the
/// model self-corrects on the next step.
pub async fn complete_with_retry(
    provider: &dyn ModelProvider,
    req: &CompletionRequest,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<ChunkStream, ProviderError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.complete(req.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = match &err {
                    ProviderError::RateLimited {
                        retry_after: Some(hint),
                    } => *hint,
                    _ => base_delay * 2u32.saturating_pow(attempt - 1),
                };
                warn!(
                    provider = provider.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::ModelChunk;

    /// Fails with a transient error `failures` times, then succeeds.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
        fatal: bool,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.fatal {
                    return Err(ProviderError::Api {
                        status: 400,
                        message: "bad".into(),
                    });
                }
                return Err(ProviderError::Network("connection reset".into()));
            }
            Ok(Box::pin(stream::iter(vec![Ok(ModelChunk::Done)])))
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let provider = FlakyProvider {
            failures: 2,
            calls: AtomicU32::new(0),
            fatal: false,
        };
        let req = CompletionRequest::default();
        let result = complete_with_retry(&provider, &req, 3, Duration::from_millis(1)).await;
        assert!(result.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = FlakyProvider {
            failures: 10,
            calls: AtomicU32::new(0),
            fatal: false,
        };
        let req = CompletionRequest::default();
        let result = complete_with_retry(&provider, &req, 3, Duration::from_millis(1)).await;
        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let provider = FlakyProvider {
            failures: 10,
            calls: AtomicU32::new(0),
            fatal: true,
        };
        let req = CompletionRequest::default();
        let result = complete_with_retry(&provider, &req, 3, Duration::from_millis(1)).await;
        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
