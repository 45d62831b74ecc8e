// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A credit balance as reported by the billing service.
///
/// Balances may go negative: a user (or organization) that overruns its
/// remaining credits mid-stream ends the cycle in debt, and the gate reports
/// that debt back in the halt message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub total_remaining: i64,
    pub total_debt: i64,
    #[serde(default)]
    pub breakdown: BalanceBreakdown,
}

/// Where the remaining credits come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceBreakdown {
    /// Credits granted by the monthly cycle.
    pub monthly: i64,
    /// Credits purchased or added via auto top-up.
    pub purchased: i64,
}

impl Balance {
    pub fn with_remaining(total_remaining: i64) -> Self {
        Self {
            total_remaining,
            total_debt: if total_remaining < 0 {
                -total_remaining
            } else {
                0
            },
            breakdown: BalanceBreakdown {
                monthly: total_remaining.max(0),
                purchased: 0,
            },
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.total_remaining <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_remaining_implies_debt() {
        let b = Balance::with_remaining(-42);
        assert_eq!(b.total_debt, 42);
        assert!(b.is_exhausted());
    }

    #[test]
    fn zero_remaining_is_exhausted_without_debt() {
        let b = Balance::with_remaining(0);
        assert_eq!(b.total_debt, 0);
        assert!(b.is_exhausted());
    }

    #[test]
    fn positive_balance_is_not_exhausted() {
        assert!(!Balance::with_remaining(500).is_exhausted());
    }
}
