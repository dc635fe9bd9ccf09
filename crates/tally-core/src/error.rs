//! Error types for tally.

use rust_decimal::Decimal;

use crate::ids::IdError;

/// Result type for tally operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in tally operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Insufficient credits for the operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Account already exists.
    #[error("account already exists: {account_id}")]
    AccountAlreadyExists {
        /// The account ID that already exists.
        account_id: String,
    },

    /// Account is soft-disabled.
    #[error("account disabled: {account_id}")]
    AccountDisabled {
        /// The disabled account.
        account_id: String,
    },

    /// Auto-top-up needs a stored payment method.
    #[error("no payment method on file for {account_id}")]
    PaymentMethodMissing {
        /// The account without a payment method.
        account_id: String,
    },

    /// The payment processor declined or failed the charge.
    #[error("payment processor charge failed: {0}")]
    ProcessorChargeFailed(String),

    /// A payment confirmation was already credited.
    #[error("payment confirmation already applied: {confirmation_ref}")]
    DuplicateConfirmation {
        /// The processor confirmation reference.
        confirmation_ref: String,
    },

    /// Completed usage could not be written to the ledger.
    #[error("settlement of usage {usage_id} failed: {message}")]
    SettlementFailed {
        /// The usage record that needs manual reconciliation.
        usage_id: String,
        /// Last error seen.
        message: String,
    },

    /// A usage ID was already used for a different outcome.
    #[error("usage already recorded: {usage_id}")]
    DuplicateUsage {
        /// The usage record ID.
        usage_id: String,
    },

    /// Referral code does not exist or does not belong to the referrer.
    #[error("invalid referral code: {0}")]
    InvalidReferralCode(String),

    /// The account was already referred.
    #[error("referral already redeemed for {account_id}")]
    ReferralAlreadyRedeemed {
        /// The referred account.
        account_id: String,
    },

    /// An account tried to redeem its own code.
    #[error("accounts cannot redeem their own referral code")]
    SelfReferral,

    /// Malformed billing period.
    #[error("invalid billing period: {0}")]
    InvalidPeriod(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}
