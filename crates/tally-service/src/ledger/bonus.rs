//! Welcome and referral bonuses.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tally_core::{
    AccountId, BillingError, LedgerEntry, NewEntry, ReferralCode, ReferralRecord, Result,
};
use tally_store::{Store, StoreError};

/// Attempts at minting a referral code that does not collide.
const CODE_GENERATION_ATTEMPTS: usize = 5;

/// Bonus amounts.
#[derive(Debug, Clone, Copy)]
pub struct BonusConfig {
    /// One-time welcome credit. Zero turns welcome bonuses off.
    pub welcome_amount: Decimal,
    /// Credit paid to a referrer per redeemed code. Zero turns it off.
    pub referral_amount: Decimal,
}

/// Outcome of a welcome bonus request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "entry", rename_all = "snake_case")]
pub enum WelcomeBonus {
    /// The bonus was credited now.
    Issued(LedgerEntry),
    /// The account already had its bonus.
    AlreadyIssued,
    /// Welcome bonuses are turned off.
    NotConfigured,
}

/// Issues one-time promotional credits.
pub struct BonusIssuer {
    store: Arc<dyn Store>,
    config: BonusConfig,
}

impl BonusIssuer {
    /// Create an issuer.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: BonusConfig) -> Self {
        Self { store, config }
    }

    /// Credit the welcome bonus unless the account already has it.
    pub fn issue_welcome_bonus(&self, account_id: &AccountId) -> Result<WelcomeBonus> {
        if self.config.welcome_amount.is_zero() {
            return Ok(WelcomeBonus::NotConfigured);
        }

        let entry = NewEntry::welcome_bonus(*account_id, self.config.welcome_amount);
        match self.store.append(&entry) {
            Ok(committed) => {
                tracing::info!(
                    account_id = %account_id,
                    amount = %committed.amount,
                    "Welcome bonus issued"
                );
                Ok(WelcomeBonus::Issued(committed))
            }
            Err(StoreError::DuplicateWelcomeBonus { .. }) => Ok(WelcomeBonus::AlreadyIssued),
            Err(e) => Err(e.into()),
        }
    }

    /// Pay `referrer` for bringing in `new_account` with `code`.
    ///
    /// The referral record and the credit are written together; a referred
    /// account can only ever pay out one bonus.
    pub fn issue_referral_bonus(
        &self,
        referrer: &AccountId,
        new_account: &AccountId,
        code: &str,
    ) -> Result<LedgerEntry> {
        let code = ReferralCode::normalize(code);
        let owner = self
            .store
            .find_referral_code(&code)?
            .ok_or_else(|| BillingError::InvalidReferralCode(code.clone()))?;
        if owner.account_id != *referrer {
            return Err(BillingError::InvalidReferralCode(code));
        }
        if referrer == new_account {
            return Err(BillingError::SelfReferral);
        }
        if self.config.referral_amount.is_zero() {
            return Err(BillingError::Configuration(
                "referral bonuses are turned off".into(),
            ));
        }

        let record = ReferralRecord::issued(*referrer, code.clone(), *new_account);
        let bonus = NewEntry::referral_bonus(*referrer, self.config.referral_amount, *new_account);
        let committed = self.store.redeem_referral(&record, &bonus)?;

        tracing::info!(
            referrer = %referrer,
            referred = %new_account,
            code = %code,
            amount = %committed.amount,
            "Referral bonus issued"
        );
        Ok(committed)
    }

    /// Redeem `code` on behalf of `new_account`.
    pub fn redeem_referral(&self, new_account: &AccountId, code: &str) -> Result<LedgerEntry> {
        let normalized = ReferralCode::normalize(code);
        let owner = self
            .store
            .find_referral_code(&normalized)?
            .ok_or_else(|| BillingError::InvalidReferralCode(normalized.clone()))?;
        self.issue_referral_bonus(&owner.account_id, new_account, &normalized)
    }

    /// The account's referral code, created on first request.
    pub fn referral_code(&self, account_id: &AccountId) -> Result<ReferralCode> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            match self
                .store
                .get_or_create_referral_code(&ReferralCode::generate(*account_id))
            {
                Ok(code) => return Ok(code),
                Err(StoreError::ReferralCodeTaken { code }) => {
                    tracing::debug!(code = %code, "Referral code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BillingError::Storage(
            "could not generate a unique referral code".into(),
        ))
    }
}

impl std::fmt::Debug for BonusIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BonusIssuer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_core::{Account, EntryKind};
    use tally_store::memory::MemoryStore;

    fn issuer() -> (Arc<MemoryStore>, BonusIssuer) {
        let store = Arc::new(MemoryStore::new());
        let issuer = BonusIssuer::new(
            store.clone(),
            BonusConfig {
                welcome_amount: dec!(5),
                referral_amount: dec!(3),
            },
        );
        (store, issuer)
    }

    fn account(store: &MemoryStore) -> AccountId {
        let account = Account::new(AccountId::generate());
        store.create_account(&account).unwrap();
        account.account_id
    }

    #[test]
    fn welcome_bonus_is_issued_once() {
        let (store, issuer) = issuer();
        let account_id = account(&store);

        let first = issuer.issue_welcome_bonus(&account_id).unwrap();
        let second = issuer.issue_welcome_bonus(&account_id).unwrap();

        assert!(matches!(first, WelcomeBonus::Issued(ref e) if e.kind == EntryKind::WelcomeBonus));
        assert_eq!(second, WelcomeBonus::AlreadyIssued);
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(5));
    }

    #[test]
    fn referral_credits_the_referrer() {
        let (store, issuer) = issuer();
        let referrer = account(&store);
        let referred = account(&store);
        let code = issuer.referral_code(&referrer).unwrap();

        let entry = issuer
            .redeem_referral(&referred, &code.code.to_lowercase())
            .unwrap();

        assert_eq!(entry.account_id, referrer);
        assert_eq!(entry.kind, EntryKind::ReferralBonus);
        assert_eq!(store.get_balance(&referrer).unwrap(), dec!(3));
        assert_eq!(store.get_balance(&referred).unwrap(), dec!(0));

        let again = issuer.redeem_referral(&referred, &code.code).unwrap_err();
        assert!(matches!(again, BillingError::ReferralAlreadyRedeemed { .. }));
    }

    #[test]
    fn referral_rules_are_enforced() {
        let (store, issuer) = issuer();
        let referrer = account(&store);
        let other = account(&store);
        let code = issuer.referral_code(&referrer).unwrap();

        assert!(matches!(
            issuer.redeem_referral(&referrer, &code.code).unwrap_err(),
            BillingError::SelfReferral
        ));
        assert!(matches!(
            issuer.redeem_referral(&other, "NOPE1234").unwrap_err(),
            BillingError::InvalidReferralCode(_)
        ));
        assert!(matches!(
            issuer
                .issue_referral_bonus(&other, &AccountId::generate(), &code.code)
                .unwrap_err(),
            BillingError::InvalidReferralCode(_)
        ));
        assert!(matches!(
            issuer
                .issue_referral_bonus(&referrer, &AccountId::generate(), &code.code)
                .unwrap_err(),
            BillingError::AccountNotFound { .. }
        ));
    }

    #[test]
    fn referral_code_is_stable() {
        let (store, issuer) = issuer();
        let account_id = account(&store);

        let first = issuer.referral_code(&account_id).unwrap();
        let second = issuer.referral_code(&account_id).unwrap();
        assert_eq!(first, second);
    }
}
