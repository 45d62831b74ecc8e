// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! In-memory implementation of the billing and account traits.
//!
//! Backs the test suite and self-hosted single-node deployments. The ledger
//! semantics mirror what the gate chain and executor expect from a real
//! backend: debits are always recorded (debt stays visible), auto top-up
//! fires below a threshold, and the monthly reset rolls the cycle anchor.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use otto_proto::{Balance, BalanceBreakdown};

use crate::service::{BillingError, BillingService, CreditPrincipal, UserStore};
use crate::token::StoredToken;
use crate::types::{OrganizationMatch, UsageAndBalance, UserRecord};

#[derive(Debug, Clone)]
struct Account {
    record: UserRecord,
    balance: i64,
    purchased: i64,
    usage_this_cycle: i64,
    monthly_grant: i64,
    /// Auto top-up: add `amount` whenever the balance drops below
    /// `threshold`. Only consulted when the record enables auto top-up.
    topup_threshold: i64,
    topup_amount: i64,
}

#[derive(Debug, Clone)]
struct Organization {
    name: String,
    balance: i64,
    usage: i64,
    auto_topup_amount: Option<i64>,
    repos: BTreeSet<(String, String)>,
    members: BTreeSet<String>,
}

fn balance_of(remaining: i64, purchased: i64) -> Balance {
    Balance {
        total_remaining: remaining,
        total_debt: (-remaining).max(0),
        breakdown: BalanceBreakdown {
            monthly: (remaining - purchased).max(0),
            purchased: purchased.clamp(0, remaining.max(0)),
        },
    }
}

#[derive(Default)]
pub struct InMemoryAccounts {
    users: RwLock<HashMap<String, Account>>,
    tokens: RwLock<Vec<(StoredToken, String)>>,
    orgs: RwLock<HashMap<String, Organization>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user whose bearer token is only known as a stored hash
    /// (e.g. loaded from the gateway's token file).
    pub async fn add_user_with_stored_token(&self, id: &str, token: StoredToken, balance: i64) {
        let record = UserRecord {
            id: id.to_string(),
            email: None,
            next_quota_reset: Utc::now() + Duration::days(30),
            auto_topup_enabled: false,
            stripe_customer_id: None,
        };
        self.users.write().await.insert(
            id.to_string(),
            Account {
                record,
                balance,
                purchased: 0,
                usage_this_cycle: 0,
                monthly_grant: balance.max(0),
                topup_threshold: 0,
                topup_amount: 0,
            },
        );
        self.tokens.write().await.push((token, id.to_string()));
    }

    /// Register a user with a bearer token and a starting balance.
    pub async fn add_user(&self, id: &str, token: &str, balance: i64) {
        self.add_user_with_stored_token(id, StoredToken::from_raw(token), balance)
            .await;
    }

    pub async fn set_balance(&self, user_id: &str, balance: i64) {
        if let Some(account) = self.users.write().await.get_mut(user_id) {
            account.balance = balance;
        }
    }

    pub async fn set_next_quota_reset(&self, user_id: &str, at: DateTime<Utc>) {
        if let Some(account) = self.users.write().await.get_mut(user_id) {
            account.record.next_quota_reset = at;
        }
    }

    pub async fn enable_auto_topup(&self, user_id: &str, threshold: i64, amount: i64) {
        if let Some(account) = self.users.write().await.get_mut(user_id) {
            account.record.auto_topup_enabled = true;
            account.topup_threshold = threshold;
            account.topup_amount = amount;
        }
    }

    pub async fn add_organization(&self, id: &str, name: &str, balance: i64) {
        self.orgs.write().await.insert(
            id.to_string(),
            Organization {
                name: name.to_string(),
                balance,
                usage: 0,
                auto_topup_amount: None,
                repos: BTreeSet::new(),
                members: BTreeSet::new(),
            },
        );
    }

    pub async fn grant_org_repo(&self, org_id: &str, owner: &str, repo: &str, member: &str) {
        if let Some(org) = self.orgs.write().await.get_mut(org_id) {
            org.repos.insert((owner.to_string(), repo.to_string()));
            org.members.insert(member.to_string());
        }
    }

    pub async fn balance_of_user(&self, user_id: &str) -> Option<i64> {
        self.users.read().await.get(user_id).map(|a| a.balance)
    }
}

#[async_trait]
impl UserStore for InMemoryAccounts {
    async fn user_for_token(&self, token: &str) -> Result<Option<UserRecord>, BillingError> {
        let tokens = self.tokens.read().await;
        for (stored, user_id) in tokens.iter() {
            if stored.verify(token) {
                let users = self.users.read().await;
                return Ok(users.get(user_id).map(|a| a.record.clone()));
            }
        }
        Ok(None)
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>, BillingError> {
        Ok(self.users.read().await.get(id).map(|a| a.record.clone()))
    }
}

#[async_trait]
impl BillingService for InMemoryAccounts {
    async fn calculate_usage_and_balance(
        &self,
        user_id: &str,
        _anchor: DateTime<Utc>,
    ) -> Result<UsageAndBalance, BillingError> {
        let users = self.users.read().await;
        let account = users
            .get(user_id)
            .ok_or_else(|| BillingError::Store(format!("unknown user {user_id}")))?;
        Ok(UsageAndBalance {
            usage_this_cycle: account.usage_this_cycle,
            balance: balance_of(account.balance, account.purchased),
        })
    }

    async fn calculate_organization_usage_and_balance(
        &self,
        org_id: &str,
    ) -> Result<UsageAndBalance, BillingError> {
        let orgs = self.orgs.read().await;
        let org = orgs
            .get(org_id)
            .ok_or_else(|| BillingError::Store(format!("unknown organization {org_id}")))?;
        Ok(UsageAndBalance {
            usage_this_cycle: org.usage,
            balance: balance_of(org.balance, 0),
        })
    }

    async fn trigger_monthly_reset_and_grant(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, BillingError> {
        let mut users = self.users.write().await;
        let account = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::Store(format!("unknown user {user_id}")))?;
        if account.record.next_quota_reset > Utc::now() {
            return Ok(None);
        }
        // Debt carries into the new cycle; the grant is added on top.
        account.balance += account.monthly_grant;
        account.usage_this_cycle = 0;
        let mut next = account.record.next_quota_reset;
        let now = Utc::now();
        while next <= now {
            next += Duration::days(30);
        }
        account.record.next_quota_reset = next;
        info!(user = user_id, "monthly credit grant applied");
        Ok(Some(next))
    }

    async fn check_and_trigger_auto_topup(
        &self,
        user_id: &str,
    ) -> Result<Option<i64>, BillingError> {
        let mut users = self.users.write().await;
        let account = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::Store(format!("unknown user {user_id}")))?;
        if !account.record.auto_topup_enabled || account.balance > account.topup_threshold {
            return Ok(None);
        }
        account.balance += account.topup_amount;
        account.purchased += account.topup_amount;
        info!(
            user = user_id,
            amount = account.topup_amount,
            "auto top-up applied"
        );
        Ok(Some(account.topup_amount))
    }

    async fn check_and_trigger_org_auto_topup(
        &self,
        org_id: &str,
    ) -> Result<Option<i64>, BillingError> {
        let mut orgs = self.orgs.write().await;
        let org = orgs
            .get_mut(org_id)
            .ok_or_else(|| BillingError::Store(format!("unknown organization {org_id}")))?;
        let Some(amount) = org.auto_topup_amount else {
            return Ok(None);
        };
        if org.balance > 0 {
            return Ok(None);
        }
        org.balance += amount;
        Ok(Some(amount))
    }

    async fn find_organization_for_repository(
        &self,
        user_id: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Option<OrganizationMatch>, BillingError> {
        let orgs = self.orgs.read().await;
        for (id, org) in orgs.iter() {
            if org.repos.contains(&(owner.to_string(), repo.to_string()))
                && org.members.contains(user_id)
            {
                return Ok(Some(OrganizationMatch {
                    organization_id: id.clone(),
                    organization_name: org.name.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn consume_credits(
        &self,
        principal: &CreditPrincipal,
        amount: u64,
    ) -> Result<(), BillingError> {
        let amount = amount as i64;
        match principal {
            CreditPrincipal::User(id) => {
                let mut users = self.users.write().await;
                let account = users
                    .get_mut(id)
                    .ok_or_else(|| BillingError::Store(format!("unknown user {id}")))?;
                let before = account.balance;
                account.balance -= amount;
                account.usage_this_cycle += amount;
                // The debit that crosses zero is honored (the debt stays
                // visible); once already exhausted, further spend is refused.
                if before <= 0 && amount > 0 {
                    return Err(BillingError::Insufficient {
                        remaining: account.balance,
                    });
                }
                Ok(())
            }
            CreditPrincipal::Organization(id) => {
                let mut orgs = self.orgs.write().await;
                let org = orgs
                    .get_mut(id)
                    .ok_or_else(|| BillingError::Store(format!("unknown organization {id}")))?;
                let before = org.balance;
                org.balance -= amount;
                org.usage += amount;
                if before <= 0 && amount > 0 {
                    return Err(BillingError::Insufficient {
                        remaining: org.balance,
                    });
                }
                Ok(())
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
