//! Usage records for tally.
//!
//! One record is written per AI operation attempt. Completed records are
//! settled against the ledger; failed records are kept for reporting only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, UsageId};

/// A metered AI operation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record ID.
    pub id: UsageId,

    /// The account charged.
    pub account_id: AccountId,

    /// Operation label (e.g. `comprehensive_extraction`).
    pub operation: String,

    /// Model that served the operation.
    pub model: String,

    /// Prompt tokens.
    pub tokens_in: u64,

    /// Completion tokens.
    pub tokens_out: u64,

    /// Cost charged. Zero for failed attempts.
    pub cost: Decimal,

    /// Version of the pricing table the cost was computed with.
    pub pricing_version: u32,

    /// Outcome of the attempt.
    pub status: UsageStatus,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A completed operation, ready to be settled.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        id: UsageId,
        account_id: AccountId,
        operation: impl Into<String>,
        model: impl Into<String>,
        tokens_in: u64,
        tokens_out: u64,
        cost: Decimal,
        pricing_version: u32,
    ) -> Self {
        Self {
            id,
            account_id,
            operation: operation.into(),
            model: model.into(),
            tokens_in,
            tokens_out,
            cost,
            pricing_version,
            status: UsageStatus::Completed,
            created_at: Utc::now(),
        }
    }

    /// A failed or cancelled operation. Never charged.
    #[must_use]
    pub fn failed(
        id: UsageId,
        account_id: AccountId,
        operation: impl Into<String>,
        model: impl Into<String>,
        pricing_version: u32,
    ) -> Self {
        Self {
            id,
            account_id,
            operation: operation.into(),
            model: model.into(),
            tokens_in: 0,
            tokens_out: 0,
            cost: Decimal::ZERO,
            pricing_version,
            status: UsageStatus::Failed,
            created_at: Utc::now(),
        }
    }

    /// Total tokens consumed.
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.tokens_in.saturating_add(self.tokens_out)
    }

    /// Whether the record is chargeable.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == UsageStatus::Completed
    }

    /// Description used on the ledger entry that settles this record.
    #[must_use]
    pub fn ledger_description(&self) -> String {
        format!(
            "AI usage: {} ({}, {} tokens)",
            self.operation,
            self.model,
            self.total_tokens()
        )
    }
}

/// Outcome of an AI operation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    /// The operation finished and is chargeable.
    Completed,

    /// The operation failed or was cancelled.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn completed_record() {
        let record = UsageRecord::completed(
            UsageId::generate(),
            AccountId::generate(),
            "smart_extraction",
            "gpt-4o",
            1200,
            300,
            dec!(0.006),
            1,
        );
        assert!(record.is_completed());
        assert_eq!(record.total_tokens(), 1500);
        assert_eq!(
            record.ledger_description(),
            "AI usage: smart_extraction (gpt-4o, 1500 tokens)"
        );
    }

    #[test]
    fn failed_record_costs_nothing() {
        let record = UsageRecord::failed(
            UsageId::generate(),
            AccountId::generate(),
            "bulk_extraction",
            "gpt-4o",
            1,
        );
        assert!(!record.is_completed());
        assert_eq!(record.cost, Decimal::ZERO);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&UsageStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
