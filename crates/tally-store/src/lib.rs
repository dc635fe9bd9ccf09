//! Ledger storage for tally.
//!
//! The store owns the append-only, per-account transaction log. Every balance
//! read is derived from that log; the `balance` cached on an [`Account`] is
//! maintained alongside each append and repaired by [`Store::reconcile`].
//!
//! # Backends
//!
//! - [`MemoryStore`]: always available. Used by tests and single-node setups.
//! - `RocksStore`: behind the `rocksdb-backend` feature. Column families with
//!   CBOR values; multi-key writes go through a single `WriteBatch`.
//!
//! # Concurrency
//!
//! Writes to one account are serialized by a per-account mutex. Global
//! uniqueness indexes (payment references, referral codes, referred accounts)
//! are guarded by short index locks that are always taken after the account
//! lock. Callers never hold a store lock across I/O outside the store.
//!
//! # Example
//!
//! ```
//! use rust_decimal::Decimal;
//! use tally_core::{Account, AccountId, NewEntry};
//! use tally_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let account_id = AccountId::generate();
//! store.create_account(&Account::new(account_id)).unwrap();
//!
//! let entry = store
//!     .append(&NewEntry::welcome_bonus(account_id, Decimal::TEN))
//!     .unwrap();
//! assert_eq!(entry.balance_after, Decimal::TEN);
//! assert_eq!(store.get_balance(&account_id).unwrap(), Decimal::TEN);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
mod ledger;
mod locks;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use locks::AccountLocks;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    Account, AccountId, AccountSettings, BillingPeriod, LedgerEntry, NewEntry, ReferralCode,
    ReferralRecord, UsageId, UsageRecord, YearMonth,
};

/// Position and balance of the newest entry in an account's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerHead {
    /// Sequence of the newest entry, 0 for an empty log.
    pub sequence: u64,
    /// `balance_after` of the newest entry, zero for an empty log.
    pub balance: Decimal,
}

impl LedgerHead {
    fn of(entry: Option<&LedgerEntry>) -> Self {
        entry.map_or_else(Self::default, |e| Self {
            sequence: e.sequence,
            balance: e.balance_after,
        })
    }
}

/// Outcome of replaying an account's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// The account checked.
    pub account_id: AccountId,
    /// Balance cached on the account before the check.
    pub cached_balance: Decimal,
    /// Sum of every entry amount.
    pub replayed_balance: Decimal,
    /// `balance_after` of the newest entry.
    pub latest_balance_after: Decimal,
    /// Number of entries in the log.
    pub entry_count: u64,
    /// Sequences run 1..=n without gaps.
    pub sequence_contiguous: bool,
    /// Replay, newest `balance_after` and cache all agreed before the check.
    pub consistent: bool,
    /// The cached balance was rewritten.
    pub repaired: bool,
}

impl Reconciliation {
    pub(crate) fn from_log(account: &Account, entries: &[LedgerEntry]) -> Self {
        let replayed_balance = tally_core::replay_balance(entries);
        let latest_balance_after = LedgerHead::of(entries.last()).balance;
        let sequence_contiguous = entries
            .iter()
            .zip(1u64..)
            .all(|(entry, expected)| entry.sequence == expected);
        let consistent = sequence_contiguous
            && replayed_balance == latest_balance_after
            && account.balance == replayed_balance;

        Self {
            account_id: account.account_id,
            cached_balance: account.balance,
            replayed_balance,
            latest_balance_after,
            entry_count: entries.len() as u64,
            sequence_contiguous,
            consistent,
            repaired: account.balance != replayed_balance,
        }
    }
}

/// The storage trait defining all ledger operations.
///
/// Implementations must make every method that writes more than one record
/// atomic: either every record is written or none is.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account with an empty log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AccountExists` if the ID is taken.
    fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID, with its cached balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Replace the writable settings of an account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn update_settings(&self, account_id: &AccountId, settings: &AccountSettings)
        -> Result<Account>;

    /// IDs of every account, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_account_ids(&self) -> Result<Vec<AccountId>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append an entry to an account's log.
    ///
    /// The previous balance is read, the new balance computed and the entry
    /// written inside one per-account critical section.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::AccountDisabled` for soft-disabled accounts.
    /// - `StoreError::WouldGoNegative` for an unauthorized overdraft.
    /// - `StoreError::DuplicatePaymentRef` if the payment was already credited.
    /// - `StoreError::DuplicateWelcomeBonus` for a second welcome bonus.
    /// - `StoreError::InvalidEntry` if the sign or references are wrong.
    fn append(&self, entry: &NewEntry) -> Result<LedgerEntry>;

    /// Sequence and balance of the newest entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn head(&self, account_id: &AccountId) -> Result<LedgerHead>;

    /// Current balance: the newest entry's `balance_after`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn get_balance(&self, account_id: &AccountId) -> Result<Decimal> {
        self.head(account_id).map(|head| head.balance)
    }

    /// List entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Every entry for an account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>>;

    /// The entry that credited a payment reference, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_entry_by_payment_ref(&self, payment_ref: &str) -> Result<Option<LedgerEntry>>;

    /// The `usage` entry that settled a usage record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_entry_by_usage(&self, usage_id: &UsageId) -> Result<Option<LedgerEntry>>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Store a completed usage record and its `usage` debit atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateUsage` if the record was already stored.
    /// - Every error of [`Store::append`].
    fn settle_usage(&self, record: &UsageRecord, entry: &NewEntry) -> Result<LedgerEntry>;

    /// Store a usage record without touching the ledger (failed attempts).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateUsage` if the record was already stored.
    fn record_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Get a usage record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_usage(&self, usage_id: &UsageId) -> Result<Option<UsageRecord>>;

    /// Usage records of an account created in `[from, to)`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>>;

    // =========================================================================
    // Referral Operations
    // =========================================================================

    /// Store `code` unless the account already has one; returns the stored code.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ReferralCodeTaken` if another account owns the code.
    fn get_or_create_referral_code(&self, code: &ReferralCode) -> Result<ReferralCode>;

    /// Resolve a referral code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_referral_code(&self, code: &str) -> Result<Option<ReferralCode>>;

    /// The referral that brought in an account, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_referral(&self, referred: &AccountId) -> Result<Option<ReferralRecord>>;

    /// Store a referral and credit the referrer atomically.
    ///
    /// `bonus` must be an entry for `record.referrer_account_id`.
    ///
    /// # Errors
    ///
    /// - `StoreError::ReferralAlreadyRedeemed` if the referred account was
    ///   already referred.
    /// - `StoreError::NotFound` if either account doesn't exist.
    /// - Every error of [`Store::append`].
    fn redeem_referral(&self, record: &ReferralRecord, bonus: &NewEntry) -> Result<LedgerEntry>;

    // =========================================================================
    // Billing Periods
    // =========================================================================

    /// Insert or replace a billing period summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_billing_period(&self, period: &BillingPeriod) -> Result<()>;

    /// Get a billing period summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_billing_period(
        &self,
        account_id: &AccountId,
        year_month: YearMonth,
    ) -> Result<Option<BillingPeriod>>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Replay an account's log, compare it with the cached balance, and
    /// rewrite the cache to the replayed value if they differ.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn reconcile(&self, account_id: &AccountId) -> Result<Reconciliation>;
}
