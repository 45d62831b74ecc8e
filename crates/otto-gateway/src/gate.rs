// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The request gating chain: auth → organization repo coverage → user
//! quota. Each stage either passes or halts the prompt with a typed error
//! action; stage failures never cancel the effects of earlier stages, and
//! auto top-up failures are logged rather than fatal.

use tracing::{debug, warn};

use otto_billing::{extract_owner_and_repo, BillingService, UserRecord, UserStore};
use otto_proto::actions::UsageReport;
use otto_proto::{Balance, ServerAction};

/// Error identifiers used on the wire.
pub const ERR_UNAUTHORIZED: &str = "Unauthorized";
pub const ERR_INSUFFICIENT: &str = "Insufficient credits";
pub const ERR_BILLING: &str = "Billing unavailable";
pub const ERR_INVALID: &str = "Invalid request";

/// A halted gate stage, ready to be surfaced as a `prompt-error` (when the
/// halted action is a prompt) or an `action-error` (anything else).
#[derive(Debug, Clone, PartialEq)]
pub struct GateHalt {
    pub error: String,
    pub message: String,
    pub remaining_balance: Option<i64>,
}

impl GateHalt {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            remaining_balance: None,
        }
    }

    pub fn with_balance(mut self, remaining: i64) -> Self {
        self.remaining_balance = Some(remaining);
        self
    }

    pub fn into_prompt_error(self, user_input_id: impl Into<String>) -> ServerAction {
        ServerAction::PromptError {
            user_input_id: user_input_id.into(),
            error: self.error,
            message: self.message,
            remaining_balance: self.remaining_balance,
        }
    }

    pub fn into_action_error(self) -> ServerAction {
        ServerAction::ActionError {
            error: self.error,
            message: self.message,
            remaining_balance: self.remaining_balance,
        }
    }
}

/// Repo coverage resolved by the org stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoGrant {
    pub owner: String,
    pub repo: String,
    pub org_id: Option<String>,
    pub org_name: Option<String>,
}

/// Everything the main handler needs once the chain has passed.
#[derive(Debug, Clone)]
pub struct Admission {
    pub user: UserRecord,
    pub repo: Option<RepoGrant>,
    pub usage: UsageReport,
}

/// Run the full chain. Only after this returns `Ok` may the agent loop run.
pub async fn admit(
    auth_token: Option<&str>,
    repo_url: Option<&str>,
    users: &dyn UserStore,
    billing: &dyn BillingService,
) -> Result<Admission, GateHalt> {
    // ── Stage 1: auth ─────────────────────────────────────────────────────
    let Some(token) = auth_token else {
        return Err(GateHalt::new(
            ERR_UNAUTHORIZED,
            "Authentication required. Please log in and retry.",
        ));
    };
    let mut user = match users.user_for_token(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Err(GateHalt::new(
                ERR_UNAUTHORIZED,
                "Invalid auth token. Please log in again.",
            ))
        }
        Err(e) => {
            warn!("auth lookup failed: {e}");
            return Err(GateHalt::new(ERR_BILLING, format!("account lookup failed: {e}")));
        }
    };

    // ── Stage 2: organization repo coverage ───────────────────────────────
    let repo = match repo_url {
        Some(url) => org_coverage(url, &user, billing).await?,
        None => None,
    };

    // ── Stage 3: user quota ───────────────────────────────────────────────
    match billing.trigger_monthly_reset_and_grant(&user.id).await {
        Ok(Some(next)) => {
            debug!(user = %user.id, %next, "quota cycle rolled");
            user.next_quota_reset = next;
        }
        Ok(None) => {}
        Err(e) => warn!("monthly reset failed (continuing): {e}"),
    }

    let auto_topup_added = match billing.check_and_trigger_auto_topup(&user.id).await {
        Ok(added) => added,
        Err(e) => {
            warn!("auto top-up failed (continuing): {e}");
            None
        }
    };

    let usage_and_balance = billing
        .calculate_usage_and_balance(&user.id, user.next_quota_reset)
        .await
        .map_err(|e| {
            warn!("usage calculation failed: {e}");
            GateHalt::new(ERR_BILLING, format!("usage calculation failed: {e}"))
        })?;

    let balance = usage_and_balance.balance;
    if balance.is_exhausted() {
        return Err(user_exhausted_halt(&balance));
    }

    let mut usage = UsageReport::from_balance(
        usage_and_balance.usage_this_cycle,
        &balance,
        user.next_quota_reset,
    );
    usage.auto_topup_added = auto_topup_added;

    Ok(Admission { user, repo, usage })
}

fn user_exhausted_halt(balance: &Balance) -> GateHalt {
    let message = if balance.total_debt > 0 {
        format!(
            "Your account has a negative balance of {} credits. Please add \
             credits to continue.",
            balance.total_debt
        )
    } else {
        "You do not have enough credits to run this prompt. Please add \
         credits or wait for your monthly reset."
            .to_string()
    };
    GateHalt::new(ERR_INSUFFICIENT, message).with_balance(balance.total_remaining)
}

/// Stage 2 body: resolve `{owner, repo}`, look up coverage, and gate on the
/// organization's balance when one covers the repo.
async fn org_coverage(
    repo_url: &str,
    user: &UserRecord,
    billing: &dyn BillingService,
) -> Result<Option<RepoGrant>, GateHalt> {
    let Some((owner, repo)) = extract_owner_and_repo(repo_url) else {
        debug!(repo_url, "unparseable repo url; skipping org coverage");
        return Ok(None);
    };

    let found = match billing
        .find_organization_for_repository(&user.id, &owner, &repo)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!("organization lookup failed (continuing uncovered): {e}");
            None
        }
    };
    let Some(org) = found else {
        return Ok(Some(RepoGrant {
            owner,
            repo,
            org_id: None,
            org_name: None,
        }));
    };

    if let Err(e) = billing
        .check_and_trigger_org_auto_topup(&org.organization_id)
        .await
    {
        warn!(org = %org.organization_id, "org auto top-up failed (continuing): {e}");
    }

    let org_balance = billing
        .calculate_organization_usage_and_balance(&org.organization_id)
        .await
        .map_err(|e| {
            GateHalt::new(
                ERR_BILLING,
                format!("organization balance lookup failed: {e}"),
            )
        })?
        .balance;

    if org_balance.is_exhausted() {
        let message = if org_balance.total_debt > 0 {
            format!(
                "The organization '{}' has a balance of negative {} credits. \
                 Please contact your organization administrator.",
                org.organization_name, org_balance.total_debt
            )
        } else {
            format!(
                "The organization '{}' has no credits remaining. Please \
                 contact your organization administrator.",
                org.organization_name
            )
        };
        return Err(GateHalt::new(ERR_INSUFFICIENT, message)
            .with_balance(org_balance.total_remaining));
    }

    Ok(Some(RepoGrant {
        owner,
        repo,
        org_id: Some(org.organization_id),
        org_name: Some(org.organization_name),
    }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
