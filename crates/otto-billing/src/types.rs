// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use otto_proto::Balance;

/// Account record for an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    /// Start of the next quota cycle; usage and balances are anchored here.
    pub next_quota_reset: DateTime<Utc>,
    pub auto_topup_enabled: bool,
    pub stripe_customer_id: Option<String>,
}

/// Result of looking up organization coverage for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationMatch {
    pub organization_id: String,
    pub organization_name: String,
}

/// Usage and balance for one principal in the current cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAndBalance {
    pub usage_this_cycle: i64,
    pub balance: Balance,
}
