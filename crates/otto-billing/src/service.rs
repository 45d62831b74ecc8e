// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{OrganizationMatch, UsageAndBalance, UserRecord};

#[derive(Debug, Error)]
pub enum BillingError {
    /// The principal has run out of credits; `remaining` may be negative.
    #[error("insufficient credits ({remaining} remaining)")]
    Insufficient { remaining: i64 },

    #[error("billing store error: {0}")]
    Store(String),

    #[error("billing backend unavailable: {0}")]
    Unavailable(String),
}

/// Who credits are debited from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditPrincipal {
    User(String),
    Organization(String),
}

/// Account lookup and authentication.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolve a bearer token to a user record; `None` means invalid token.
    async fn user_for_token(&self, token: &str) -> Result<Option<UserRecord>, BillingError>;

    async fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>, BillingError>;
}

/// The credit ledger and quota machinery, as consumed by the gate chain and
/// the step executor. All operations are fallible; the chain turns failures
/// into clean halt actions rather than cancelling sibling stages.
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Usage and remaining balance for a user, anchored at the given quota
    /// reset instant.
    async fn calculate_usage_and_balance(
        &self,
        user_id: &str,
        anchor: DateTime<Utc>,
    ) -> Result<UsageAndBalance, BillingError>;

    async fn calculate_organization_usage_and_balance(
        &self,
        org_id: &str,
    ) -> Result<UsageAndBalance, BillingError>;

    /// Roll the user into a new cycle when `next_quota_reset` has passed;
    /// returns the new reset instant when a roll happened.
    async fn trigger_monthly_reset_and_grant(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, BillingError>;

    /// Auto top-up checks; a `Some(n)` means n credits were just added.
    /// Failures here are logged by callers, never fatal to the prompt.
    async fn check_and_trigger_auto_topup(
        &self,
        user_id: &str,
    ) -> Result<Option<i64>, BillingError>;

    async fn check_and_trigger_org_auto_topup(
        &self,
        org_id: &str,
    ) -> Result<Option<i64>, BillingError>;

    /// Does an organization cover this repository for this user?
    async fn find_organization_for_repository(
        &self,
        user_id: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Option<OrganizationMatch>, BillingError>;

    /// Debit `amount` credits. Returns `Insufficient` when the principal has
    /// nothing left; the debit is still recorded so debt is visible.
    async fn consume_credits(
        &self,
        principal: &CreditPrincipal,
        amount: u64,
    ) -> Result<(), BillingError>;
}
