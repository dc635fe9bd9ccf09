//! Ledger entry types for tally.
//!
//! Every balance change is an immutable [`LedgerEntry`]. Callers describe the
//! change with a [`NewEntry`]; the store assigns the id, sequence number and
//! `balance_after` inside its per-account critical section.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{format_credits, round_credits};
use crate::{AccountId, EntryId, UsageId};

/// A committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Position in the account's log, starting at 1 with no gaps.
    pub sequence: u64,

    /// Kind of entry.
    pub kind: EntryKind,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: Decimal,

    /// Balance after this entry was applied.
    pub balance_after: Decimal,

    /// Human-readable description.
    pub description: String,

    /// Usage record settled by this entry, for `usage` entries.
    pub related_usage_id: Option<UsageId>,

    /// Payment confirmation reference, for `purchase` and `auto_purchase` entries.
    pub related_payment_ref: Option<String>,

    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialize a [`NewEntry`] on top of the account's previous balance.
    #[must_use]
    pub fn from_new(entry: &NewEntry, sequence: u64, previous_balance: Decimal) -> Self {
        Self {
            id: EntryId::generate(),
            account_id: entry.account_id,
            sequence,
            kind: entry.kind,
            amount: entry.amount,
            balance_after: previous_balance + entry.amount,
            description: entry.description.clone(),
            related_usage_id: entry.related_usage_id,
            related_payment_ref: entry.related_payment_ref.clone(),
            created_at: Utc::now(),
        }
    }
}

/// A request to append an entry to an account's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    /// Target account.
    pub account_id: AccountId,

    /// Kind of entry.
    pub kind: EntryKind,

    /// Signed amount.
    pub amount: Decimal,

    /// Human-readable description.
    pub description: String,

    /// Usage record reference.
    pub related_usage_id: Option<UsageId>,

    /// Payment confirmation reference.
    pub related_payment_ref: Option<String>,

    /// Allow this debit to take the balance below zero.
    ///
    /// Only set by the credit policy when it has explicitly authorized an
    /// overdraft for settling completed work.
    #[serde(default)]
    pub overdraft_authorized: bool,
}

impl NewEntry {
    fn credit(account_id: AccountId, kind: EntryKind, amount: Decimal, description: String) -> Self {
        Self {
            account_id,
            kind,
            amount: round_credits(amount.abs()),
            description,
            related_usage_id: None,
            related_payment_ref: None,
            overdraft_authorized: false,
        }
    }

    /// A one-time signup credit.
    #[must_use]
    pub fn welcome_bonus(account_id: AccountId, amount: Decimal) -> Self {
        Self::credit(
            account_id,
            EntryKind::WelcomeBonus,
            amount,
            format!("Welcome bonus - {} AI credits", format_credits(amount)),
        )
    }

    /// A credit for a user-initiated purchase.
    #[must_use]
    pub fn purchase(account_id: AccountId, amount: Decimal, payment_ref: impl Into<String>) -> Self {
        let mut entry = Self::credit(
            account_id,
            EntryKind::Purchase,
            amount,
            format!("Purchased {} AI credits", format_credits(amount)),
        );
        entry.related_payment_ref = Some(payment_ref.into());
        entry
    }

    /// A credit for an automatic top-up.
    #[must_use]
    pub fn auto_purchase(
        account_id: AccountId,
        amount: Decimal,
        payment_ref: impl Into<String>,
    ) -> Self {
        let mut entry = Self::credit(
            account_id,
            EntryKind::AutoPurchase,
            amount,
            format!("Auto top-up of {} AI credits", format_credits(amount)),
        );
        entry.related_payment_ref = Some(payment_ref.into());
        entry
    }

    /// A credit paid to a referrer.
    #[must_use]
    pub fn referral_bonus(account_id: AccountId, amount: Decimal, referred: AccountId) -> Self {
        Self::credit(
            account_id,
            EntryKind::ReferralBonus,
            amount,
            format!("Referral bonus for inviting {referred}"),
        )
    }

    /// A debit settling a completed usage record. The amount is always negative.
    #[must_use]
    pub fn usage(account_id: AccountId, cost: Decimal, usage_id: UsageId, description: String) -> Self {
        Self {
            account_id,
            kind: EntryKind::Usage,
            amount: -round_credits(cost.abs()),
            description,
            related_usage_id: Some(usage_id),
            related_payment_ref: None,
            overdraft_authorized: false,
        }
    }

    /// A credit reversing an earlier charge.
    #[must_use]
    pub fn refund(account_id: AccountId, amount: Decimal, reason: String) -> Self {
        Self::credit(account_id, EntryKind::Refund, amount, reason)
    }

    /// A manual correction. May be positive or negative.
    #[must_use]
    pub fn adjustment(account_id: AccountId, amount: Decimal, reason: String) -> Self {
        Self {
            account_id,
            kind: EntryKind::Adjustment,
            amount: round_credits(amount),
            description: reason,
            related_usage_id: None,
            related_payment_ref: None,
            overdraft_authorized: false,
        }
    }

    /// Mark this entry as an authorized overdraft.
    #[must_use]
    pub fn with_overdraft(mut self) -> Self {
        self.overdraft_authorized = true;
        self
    }

    /// Check that the sign and references match the entry kind.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first malformed field.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount.is_zero() {
            return Err("amount must be non-zero".into());
        }
        match self.kind {
            EntryKind::Usage => {
                if self.amount.is_sign_positive() {
                    return Err("usage entries must be negative".into());
                }
                if self.related_usage_id.is_none() {
                    return Err("usage entries must reference a usage record".into());
                }
            }
            EntryKind::Adjustment => {}
            kind => {
                if self.amount.is_sign_negative() {
                    return Err(format!("{kind} entries must be positive"));
                }
                if kind.is_payment() && self.related_payment_ref.is_none() {
                    return Err(format!("{kind} entries must carry a payment reference"));
                }
            }
        }
        Ok(())
    }

    /// Whether appending this entry reduces the balance.
    #[must_use]
    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative()
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// One-time signup credit.
    WelcomeBonus,

    /// User purchased credits.
    Purchase,

    /// Automatic top-up purchase.
    AutoPurchase,

    /// Credit paid to a referrer.
    ReferralBonus,

    /// Credits consumed by an AI operation.
    Usage,

    /// Refund of earlier usage.
    Refund,

    /// Manual correction.
    Adjustment,
}

impl EntryKind {
    /// Check if this entry kind always adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::WelcomeBonus
                | Self::Purchase
                | Self::AutoPurchase
                | Self::ReferralBonus
                | Self::Refund
        )
    }

    /// Check if this entry kind always removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage)
    }

    /// Check if this entry kind is backed by a processor payment.
    #[must_use]
    pub const fn is_payment(&self) -> bool {
        matches!(self, Self::Purchase | Self::AutoPurchase)
    }

    /// The wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WelcomeBonus => "welcome_bonus",
            Self::Purchase => "purchase",
            Self::AutoPurchase => "auto_purchase",
            Self::ReferralBonus => "referral_bonus",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replay a log and return the balance it implies.
///
/// This is the ledger's ground truth; cached balances are checked against it.
pub fn replay_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries.into_iter().map(|entry| entry.amount).sum()
}
