// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use thiserror::Error;

/// Typed failure from a model driver.
///
/// The retry loop in [`crate::complete_with_retry`] decides what to do from
/// the variant alone; drivers never retry internally.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider network error: {0}")]
    Network(String),

    #[error("provider rate limited")]
    RateLimited {
        /// Server-provided hint, honored by the retry loop when present.
        retry_after: Option<Duration>,
    },

    #[error("provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider sent an unparseable response: {0}")]
    InvalidResponse(String),

    #[error("no completion turns scripted")]
    Exhausted,
}

impl ProviderError {
    /// Transient failures are retried within a step; everything else ends
    /// the step with a provider error output.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::Exhausted => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_rate_limit_are_transient() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(ProviderError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
    }

    #[test]
    fn invalid_response_is_fatal() {
        assert!(!ProviderError::InvalidResponse("garbage".into()).is_transient());
    }
}
