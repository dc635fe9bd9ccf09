//! Referral codes and redemptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 8;

/// An account's referral code. Created on first request and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCode {
    /// The referring account.
    pub account_id: AccountId,

    /// The shareable code.
    pub code: String,

    /// When the code was created.
    pub created_at: DateTime<Utc>,
}

impl ReferralCode {
    /// Mint a fresh random code for an account.
    #[must_use]
    pub fn generate(account_id: AccountId) -> Self {
        let code = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .to_ascii_uppercase()
            .chars()
            .take(REFERRAL_CODE_LEN)
            .collect();
        Self {
            account_id,
            code,
            created_at: Utc::now(),
        }
    }

    /// Canonical form of user-entered codes.
    #[must_use]
    pub fn normalize(code: &str) -> String {
        code.trim().to_ascii_uppercase()
    }
}

/// A redeemed referral. At most one exists per referred account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// The account that shared the code.
    pub referrer_account_id: AccountId,

    /// The code that was redeemed.
    pub code: String,

    /// The newly signed-up account.
    pub referred_account_id: AccountId,

    /// Whether the referrer's bonus has been paid. Written together with the
    /// bonus entry, so it is `true` for every stored record.
    pub bonus_issued: bool,

    /// When the referral was redeemed.
    pub created_at: DateTime<Utc>,
}

impl ReferralRecord {
    /// A redemption whose bonus is being paid in the same write.
    #[must_use]
    pub fn issued(referrer: AccountId, code: impl Into<String>, referred: AccountId) -> Self {
        Self {
            referrer_account_id: referrer,
            code: code.into(),
            referred_account_id: referred,
            bonus_issued: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_short_and_uppercase() {
        let code = ReferralCode::generate(AccountId::generate());
        assert_eq!(code.code.len(), REFERRAL_CODE_LEN);
        assert!(code
            .code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn codes_differ_between_accounts() {
        let a = ReferralCode::generate(AccountId::generate());
        let b = ReferralCode::generate(AccountId::generate());
        assert_ne!(a.code, b.code);
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(ReferralCode::normalize("  ab12cd34 "), "AB12CD34");
    }
}
