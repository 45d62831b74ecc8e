// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio_util::sync::CancellationToken;

use otto_billing::CreditPrincipal;

/// Request-scoped values bound once per prompt and passed explicitly to
/// every component that needs them. Immutable after construction; the
/// cancellation token is the only live part and is one-shot.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_session_id: String,
    /// The prompt id; every chunk and error for this prompt carries it.
    pub user_input_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    /// Set when an organization covers this repo; credits are then debited
    /// from the organization instead of the user.
    pub org_id: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// An anonymous context for tests and self-hosted runs without billing.
    pub fn anonymous(client_session_id: impl Into<String>, user_input_id: impl Into<String>) -> Self {
        Self {
            client_session_id: client_session_id.into(),
            user_input_id: user_input_id.into(),
            user_id: None,
            user_email: None,
            repo_owner: None,
            repo_name: None,
            org_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Who pays for this prompt's credits, if anyone.
    pub fn principal(&self) -> Option<CreditPrincipal> {
        if let Some(org) = &self.org_id {
            return Some(CreditPrincipal::Organization(org.clone()));
        }
        self.user_id.clone().map(CreditPrincipal::User)
    }
}
