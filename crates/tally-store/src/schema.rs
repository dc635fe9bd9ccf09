//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records (settings plus cached balance), keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// The ledger, keyed by `account_id || sequence` (sequence big-endian).
    /// Prefix iteration yields one account's log in append order.
    pub const LEDGER: &str = "ledger";

    /// Marker for accounts that received their welcome bonus, keyed by
    /// `account_id`. Value is empty.
    pub const WELCOME_BONUSES: &str = "welcome_bonuses";

    /// Index: payment reference to the ledger key of the entry it credited.
    pub const PAYMENT_REFS: &str = "payment_refs";

    /// Usage records, keyed by `usage_id` (ULID).
    pub const USAGE: &str = "usage";

    /// Index: usage records by account, keyed by `account_id || usage_id`.
    /// Value is empty (index only).
    pub const USAGE_BY_ACCOUNT: &str = "usage_by_account";

    /// Index: usage record to the ledger key of its `usage` entry.
    pub const USAGE_ENTRIES: &str = "usage_entries";

    /// Referral codes, keyed by the code.
    pub const REFERRAL_CODES: &str = "referral_codes";

    /// Index: the code owned by an account, keyed by `account_id`.
    pub const REFERRAL_CODES_BY_ACCOUNT: &str = "referral_codes_by_account";

    /// Redeemed referrals, keyed by the referred `account_id`.
    pub const REFERRALS: &str = "referrals";

    /// Billing period summaries, keyed by `account_id || YYYY-MM`.
    pub const BILLING_PERIODS: &str = "billing_periods";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::LEDGER,
        cf::WELCOME_BONUSES,
        cf::PAYMENT_REFS,
        cf::USAGE,
        cf::USAGE_BY_ACCOUNT,
        cf::USAGE_ENTRIES,
        cf::REFERRAL_CODES,
        cf::REFERRAL_CODES_BY_ACCOUNT,
        cf::REFERRALS,
        cf::BILLING_PERIODS,
    ]
}
