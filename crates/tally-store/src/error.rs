//! Error types for tally storage.

use rust_decimal::Decimal;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// An account with this ID already exists.
    #[error("account already exists: {account_id}")]
    AccountExists {
        /// The duplicate account ID.
        account_id: String,
    },

    /// The account is soft-disabled and accepts no new entries.
    #[error("account disabled: {account_id}")]
    AccountDisabled {
        /// The disabled account.
        account_id: String,
    },

    /// The debit would take the balance below zero.
    #[error("entry would make balance negative: balance={balance}, required={required}")]
    WouldGoNegative {
        /// Balance before the entry.
        balance: Decimal,
        /// Size of the attempted debit.
        required: Decimal,
    },

    /// A payment reference was already credited.
    #[error("duplicate payment reference: {payment_ref}")]
    DuplicatePaymentRef {
        /// The reused reference.
        payment_ref: String,
    },

    /// A usage record was already stored.
    #[error("duplicate usage record: {usage_id}")]
    DuplicateUsage {
        /// The usage record ID.
        usage_id: String,
    },

    /// The account already received its welcome bonus.
    #[error("welcome bonus already issued for {account_id}")]
    DuplicateWelcomeBonus {
        /// The account.
        account_id: String,
    },

    /// The referred account was already referred.
    #[error("referral already redeemed for {account_id}")]
    ReferralAlreadyRedeemed {
        /// The referred account.
        account_id: String,
    },

    /// A generated referral code collided with an existing one.
    #[error("referral code already taken: {code}")]
    ReferralCodeTaken {
        /// The colliding code.
        code: String,
    },

    /// The entry is malformed for its kind.
    #[error("invalid ledger entry: {0}")]
    InvalidEntry(String),
}

impl From<StoreError> for tally_core::BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound { account_id: id },
            StoreError::AccountExists { account_id } => Self::AccountAlreadyExists { account_id },
            StoreError::AccountDisabled { account_id } => Self::AccountDisabled { account_id },
            StoreError::WouldGoNegative { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::DuplicatePaymentRef { payment_ref } => Self::DuplicateConfirmation {
                confirmation_ref: payment_ref,
            },
            StoreError::DuplicateUsage { usage_id } => Self::DuplicateUsage { usage_id },
            StoreError::ReferralAlreadyRedeemed { account_id } => {
                Self::ReferralAlreadyRedeemed { account_id }
            }
            StoreError::InvalidEntry(msg) => Self::InvalidAmount(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl StoreError {
    pub(crate) fn account_not_found(account_id: &tally_core::AccountId) -> Self {
        Self::NotFound {
            entity: "account",
            id: account_id.to_string(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Database("lock poisoned".into())
    }

    /// Whether retrying the same call could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
