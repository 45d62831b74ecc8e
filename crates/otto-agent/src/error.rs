// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use otto_model::ProviderError;

/// Step-level failures. Tool failures never reach this type: they are
/// captured at the tool boundary as `errorMessage` results. Whatever does
/// surface here terminates the agent with an `error` output.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The prompt's cancellation token fired.
    #[error("aborted")]
    Aborted,

    /// The model call failed after retries were exhausted.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Invariant violation or unrecoverable internal state.
    #[error("{0}")]
    Fatal(String),
}
