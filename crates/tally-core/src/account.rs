//! Account types for tally.
//!
//! An account holds a cached balance plus the settings that drive auto-top-up.
//! The balance is a cache of the ledger; only the store touches it, and only in
//! the same write that appends a ledger entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Default auto-top-up threshold ($5.00).
pub const DEFAULT_AUTO_TOP_UP_THRESHOLD: Decimal = Decimal::from_parts(500, 0, 0, false, 2);

/// Default auto-top-up purchase amount ($20.00).
pub const DEFAULT_AUTO_TOP_UP_AMOUNT: Decimal = Decimal::from_parts(2000, 0, 0, false, 2);

/// A credit account for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account ID (the user's identity-provider subject).
    pub account_id: AccountId,

    /// Cached balance. Derived from the ledger, never authoritative.
    pub balance: Decimal,

    /// User-controlled settings.
    pub settings: AccountSettings,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance and default settings.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance: Decimal::ZERO,
            settings: AccountSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the cached balance covers an amount.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Whether the account is soft-disabled.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.settings.disabled
    }
}

/// The writable part of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Auto-top-up configuration.
    pub auto_top_up: AutoTopUpSettings,

    /// Stored payment method used for automatic purchases.
    pub payment_method: Option<PaymentMethod>,

    /// Soft-disable flag. Disabled accounts reject new ledger entries.
    #[serde(default)]
    pub disabled: bool,
}

impl AccountSettings {
    /// Whether an automatic purchase could run for this account right now.
    #[must_use]
    pub const fn can_auto_top_up(&self) -> bool {
        self.auto_top_up.enabled && self.payment_method.is_some()
    }
}

/// Auto-top-up configuration.
///
/// When enabled, credits are purchased automatically once the balance drops to
/// or below the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTopUpSettings {
    /// Whether auto-top-up is enabled.
    pub enabled: bool,

    /// Trigger when the balance is at or below this amount.
    pub threshold: Decimal,

    /// Amount to purchase.
    pub amount: Decimal,
}

impl Default for AutoTopUpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_AUTO_TOP_UP_THRESHOLD,
            amount: DEFAULT_AUTO_TOP_UP_AMOUNT,
        }
    }
}

impl AutoTopUpSettings {
    /// Whether a balance should trigger a top-up.
    #[must_use]
    pub fn is_triggered_by(&self, balance: Decimal) -> bool {
        self.enabled && balance <= self.threshold
    }
}

/// A payment method stored with the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// Processor-side payment method reference (e.g. `pm_...`).
    pub payment_method_ref: String,

    /// Processor-side customer reference (e.g. `cus_...`), if the processor needs one.
    #[serde(default)]
    pub customer_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(AccountId::generate());
        assert_eq!(account.balance, Decimal::ZERO);
        assert!(!account.settings.auto_top_up.enabled);
        assert!(account.settings.payment_method.is_none());
        assert!(!account.is_disabled());
    }

    #[test]
    fn default_top_up_amounts() {
        let settings = AutoTopUpSettings::default();
        assert_eq!(settings.threshold, dec!(5.00));
        assert_eq!(settings.amount, dec!(20.00));
    }

    #[test]
    fn account_sufficient_credits() {
        let mut account = Account::new(AccountId::generate());
        account.balance = dec!(10.00);

        assert!(account.has_sufficient_credits(dec!(9.99)));
        assert!(account.has_sufficient_credits(dec!(10)));
        assert!(!account.has_sufficient_credits(dec!(10.000001)));
    }

    #[test]
    fn top_up_trigger_is_inclusive() {
        let settings = AutoTopUpSettings {
            enabled: true,
            threshold: dec!(5),
            amount: dec!(20),
        };
        assert!(settings.is_triggered_by(dec!(5)));
        assert!(settings.is_triggered_by(dec!(0.01)));
        assert!(!settings.is_triggered_by(dec!(5.01)));

        let disabled = AutoTopUpSettings {
            enabled: false,
            ..settings
        };
        assert!(!disabled.is_triggered_by(dec!(0)));
    }

    #[test]
    fn auto_top_up_needs_payment_method() {
        let mut settings = AccountSettings::default();
        settings.auto_top_up.enabled = true;
        assert!(!settings.can_auto_top_up());

        settings.payment_method = Some(PaymentMethod {
            payment_method_ref: "pm_123".into(),
            customer_ref: None,
        });
        assert!(settings.can_auto_top_up());
    }
}
