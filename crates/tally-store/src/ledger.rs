//! Append rules shared by every backend.
//!
//! Backends gather the facts (account, log head, index lookups) inside their
//! per-account critical section and hand them to [`plan_append`], which either
//! materializes the next entry or says why it must be rejected.

use rust_decimal::Decimal;
use tally_core::{Account, EntryKind, LedgerEntry, NewEntry};

use crate::error::{Result, StoreError};
use crate::LedgerHead;

/// Index facts a backend looked up for the entry being appended.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IndexFacts {
    /// The account already has a `welcome_bonus` entry.
    pub welcome_bonus_issued: bool,
    /// The entry's payment reference is already in the store.
    pub payment_ref_taken: bool,
}

/// Validate `entry` against the current state and build the entry to write.
pub(crate) fn plan_append(
    account: &Account,
    head: LedgerHead,
    entry: &NewEntry,
    facts: IndexFacts,
) -> Result<LedgerEntry> {
    if entry.account_id != account.account_id {
        return Err(StoreError::InvalidEntry(format!(
            "entry for {} appended to {}",
            entry.account_id, account.account_id
        )));
    }
    entry.validate().map_err(StoreError::InvalidEntry)?;

    if account.is_disabled() {
        return Err(StoreError::AccountDisabled {
            account_id: account.account_id.to_string(),
        });
    }

    if entry.kind == EntryKind::WelcomeBonus && facts.welcome_bonus_issued {
        return Err(StoreError::DuplicateWelcomeBonus {
            account_id: account.account_id.to_string(),
        });
    }

    if facts.payment_ref_taken {
        return Err(StoreError::DuplicatePaymentRef {
            payment_ref: entry.related_payment_ref.clone().unwrap_or_default(),
        });
    }

    let next_balance = head.balance + entry.amount;
    if entry.is_debit() && next_balance < Decimal::ZERO && !entry.overdraft_authorized {
        return Err(StoreError::WouldGoNegative {
            balance: head.balance,
            required: -entry.amount,
        });
    }

    Ok(LedgerEntry::from_new(entry, head.sequence + 1, head.balance))
}
