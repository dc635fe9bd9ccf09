//! Automatic credit purchases when a balance runs low.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tally_core::{AccountId, BillingError, NewEntry, Result};
use tally_store::{AccountLocks, Store, StoreError};

use super::events::{BalanceChanged, BalanceListener};
use crate::payments::{ChargeRequest, ChargeStatus, PaymentProcessor};

/// Outcome of a top-up attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopUpResult {
    /// Balance is above the threshold.
    NotNeeded {
        /// Current balance.
        balance: Decimal,
    },
    /// Auto-top-up is turned off for the account.
    Disabled,
    /// Auto-top-up is on but there is nothing to charge.
    PaymentMethodMissing,
    /// A charge succeeded and was credited.
    ToppedUp {
        /// Credits added.
        amount: Decimal,
        /// Balance after the credit.
        balance: Decimal,
        /// Processor confirmation reference.
        confirmation_ref: String,
    },
    /// The confirmation was credited earlier; nothing changed.
    AlreadyApplied {
        /// Current balance.
        balance: Decimal,
        /// Processor confirmation reference.
        confirmation_ref: String,
    },
    /// The charge did not go through.
    Failed {
        /// Why.
        reason: String,
    },
}

impl TopUpResult {
    /// Whether credits were (or had already been) added.
    #[must_use]
    pub const fn is_credited(&self) -> bool {
        matches!(self, Self::ToppedUp { .. } | Self::AlreadyApplied { .. })
    }
}

/// Where a payment confirmation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSource {
    /// A user-initiated checkout.
    Checkout,
    /// An auto-top-up charge.
    AutoTopUp,
}

/// Charges stored payment methods and credits the ledger.
///
/// Top-ups for one account run one at a time behind an async lock. The lock
/// is separate from the store's ledger locks, so slow processor calls never
/// block appends.
pub struct AutoTopUp {
    store: Arc<dyn Store>,
    processor: Option<Arc<dyn PaymentProcessor>>,
    locks: AccountLocks<tokio::sync::Mutex<()>>,
}

impl AutoTopUp {
    /// Create an orchestrator. Without a processor every charge fails softly.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, processor: Option<Arc<dyn PaymentProcessor>>) -> Self {
        Self {
            store,
            processor,
            locks: AccountLocks::default(),
        }
    }

    /// Top the account up if its balance is at or below the threshold.
    ///
    /// Only a missing account or a storage failure is an error. Processor
    /// trouble comes back as [`TopUpResult::Failed`].
    pub async fn maybe_top_up(&self, account_id: &AccountId) -> Result<TopUpResult> {
        let lock = self.locks.get(account_id)?;
        let _guard = lock.lock().await;

        // Re-read under the lock so a queued trigger sees the previous top-up.
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| BillingError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;
        let settings = &account.settings;

        if settings.disabled || !settings.auto_top_up.enabled {
            return Ok(TopUpResult::Disabled);
        }
        let Some(payment_method) = settings.payment_method.clone() else {
            return Ok(TopUpResult::PaymentMethodMissing);
        };

        let head = self.store.head(account_id)?;
        if !settings.auto_top_up.is_triggered_by(head.balance) {
            return Ok(TopUpResult::NotNeeded {
                balance: head.balance,
            });
        }

        let Some(processor) = &self.processor else {
            tracing::warn!(account_id = %account_id, "Auto-top-up triggered but no payment processor configured");
            return Ok(TopUpResult::Failed {
                reason: "no payment processor configured".into(),
            });
        };

        let amount = settings.auto_top_up.amount;
        let request = ChargeRequest {
            account_id: *account_id,
            payment_method,
            amount,
            idempotency_key: format!("topup-{account_id}-{}", head.sequence),
        };

        tracing::info!(
            account_id = %account_id,
            amount = %amount,
            balance = %head.balance,
            idempotency_key = %request.idempotency_key,
            "Charging for auto-top-up"
        );

        let outcome = match processor.charge(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    error = %e,
                    billing_health = true,
                    "Auto-top-up charge failed"
                );
                return Ok(TopUpResult::Failed {
                    reason: BillingError::ProcessorChargeFailed(e.to_string()).to_string(),
                });
            }
        };

        match outcome.status {
            ChargeStatus::Succeeded => self.apply_confirmation(
                account_id,
                amount,
                &outcome.confirmation_ref,
                PaymentSource::AutoTopUp,
            ),
            ChargeStatus::Pending => {
                tracing::info!(
                    account_id = %account_id,
                    confirmation_ref = %outcome.confirmation_ref,
                    "Auto-top-up charge pending, awaiting webhook"
                );
                Ok(TopUpResult::Failed {
                    reason: format!("charge {} pending", outcome.confirmation_ref),
                })
            }
            ChargeStatus::Failed => {
                tracing::warn!(
                    account_id = %account_id,
                    confirmation_ref = %outcome.confirmation_ref,
                    billing_health = true,
                    "Auto-top-up charge declined"
                );
                Ok(TopUpResult::Failed {
                    reason: format!("charge {} failed", outcome.confirmation_ref),
                })
            }
        }
    }

    /// Credit a payment the processor has confirmed.
    ///
    /// Applying the same `confirmation_ref` twice credits once and returns
    /// [`TopUpResult::AlreadyApplied`] the second time. A reference already
    /// credited to a different account is refused with
    /// [`BillingError::DuplicateConfirmation`].
    pub fn apply_confirmation(
        &self,
        account_id: &AccountId,
        amount: Decimal,
        confirmation_ref: &str,
        source: PaymentSource,
    ) -> Result<TopUpResult> {
        let entry = match source {
            PaymentSource::Checkout => NewEntry::purchase(*account_id, amount, confirmation_ref),
            PaymentSource::AutoTopUp => {
                NewEntry::auto_purchase(*account_id, amount, confirmation_ref)
            }
        };

        match self.store.append(&entry) {
            Ok(committed) => {
                tracing::info!(
                    account_id = %account_id,
                    amount = %amount,
                    balance = %committed.balance_after,
                    confirmation_ref = %confirmation_ref,
                    "Payment credited"
                );
                Ok(TopUpResult::ToppedUp {
                    amount: committed.amount,
                    balance: committed.balance_after,
                    confirmation_ref: confirmation_ref.to_string(),
                })
            }
            Err(StoreError::DuplicatePaymentRef { .. }) => {
                let credited = self.store.find_entry_by_payment_ref(confirmation_ref)?;
                if let Some(credited) = credited.filter(|e| e.account_id != *account_id) {
                    tracing::warn!(
                        account_id = %account_id,
                        credited_account_id = %credited.account_id,
                        confirmation_ref = %confirmation_ref,
                        "Payment reference already credited to another account"
                    );
                    return Err(BillingError::DuplicateConfirmation {
                        confirmation_ref: confirmation_ref.to_string(),
                    });
                }
                tracing::debug!(confirmation_ref = %confirmation_ref, "Payment already credited");
                Ok(TopUpResult::AlreadyApplied {
                    balance: self.store.get_balance(account_id)?,
                    confirmation_ref: confirmation_ref.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl BalanceListener for AutoTopUp {
    async fn on_balance_changed(&self, event: BalanceChanged) {
        if !event.cause.is_debit() {
            return;
        }
        match self.maybe_top_up(&event.account_id).await {
            Ok(result) => {
                tracing::debug!(account_id = %event.account_id, result = ?result, "Auto-top-up check finished");
            }
            Err(e) => {
                tracing::warn!(account_id = %event.account_id, error = %e, "Auto-top-up check failed");
            }
        }
    }
}

impl std::fmt::Debug for AutoTopUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoTopUp")
            .field("processor", &self.processor.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{ChargeOutcome, PaymentError};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tally_core::{Account, AccountSettings, AutoTopUpSettings, PaymentMethod};
    use tally_store::memory::MemoryStore;

    /// Processor that succeeds once per idempotency key, like Stripe.
    #[derive(Default)]
    struct FakeProcessor {
        calls: AtomicUsize,
        keys: Mutex<HashMap<String, String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PaymentProcessor for FakeProcessor {
        async fn charge(
            &self,
            request: &ChargeRequest,
        ) -> std::result::Result<ChargeOutcome, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(PaymentError::Declined("card declined".into()));
            }
            let mut keys = self.keys.lock().unwrap();
            let next = keys.len();
            let confirmation_ref = keys
                .entry(request.idempotency_key.clone())
                .or_insert_with(|| format!("pi_{next}"))
                .clone();
            Ok(ChargeOutcome {
                confirmation_ref,
                status: ChargeStatus::Succeeded,
            })
        }
    }

    fn setup(balance: Decimal, processor: Arc<FakeProcessor>) -> (Arc<MemoryStore>, AutoTopUp, AccountId) {
        let store = Arc::new(MemoryStore::new());
        let account = Account::new(AccountId::generate());
        let account_id = account.account_id;
        store.create_account(&account).unwrap();
        store
            .update_settings(
                &account_id,
                &AccountSettings {
                    auto_top_up: AutoTopUpSettings {
                        enabled: true,
                        threshold: dec!(5),
                        amount: dec!(20),
                    },
                    payment_method: Some(PaymentMethod {
                        payment_method_ref: "pm_card".into(),
                        customer_ref: Some("cus_1".into()),
                    }),
                    disabled: false,
                },
            )
            .unwrap();
        if !balance.is_zero() {
            store
                .append(&NewEntry::adjustment(account_id, balance, "seed".into()))
                .unwrap();
        }
        let topup = AutoTopUp::new(store.clone(), Some(processor));
        (store, topup, account_id)
    }

    #[tokio::test]
    async fn tops_up_at_threshold() {
        let processor = Arc::new(FakeProcessor::default());
        let (store, topup, account_id) = setup(dec!(5), processor.clone());

        let result = topup.maybe_top_up(&account_id).await.unwrap();
        assert!(matches!(result, TopUpResult::ToppedUp { balance, .. } if balance == dec!(25)));
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(25));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn above_threshold_is_not_needed() {
        let processor = Arc::new(FakeProcessor::default());
        let (_, topup, account_id) = setup(dec!(5.01), processor.clone());

        let result = topup.maybe_top_up(&account_id).await.unwrap();
        assert_eq!(result, TopUpResult::NotNeeded { balance: dec!(5.01) });
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_triggers_charge_once() {
        let processor = Arc::new(FakeProcessor::default());
        let (store, topup, account_id) = setup(dec!(1), processor.clone());
        let topup = Arc::new(topup);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let topup = topup.clone();
                tokio::spawn(async move { topup.maybe_top_up(&account_id).await.unwrap() })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;

        let credited = results
            .into_iter()
            .filter(|r| matches!(r.as_ref().unwrap(), TopUpResult::ToppedUp { .. }))
            .count();
        assert_eq!(credited, 1);
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(21));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replayed_confirmation_is_already_applied() {
        let processor = Arc::new(FakeProcessor::default());
        let (store, topup, account_id) = setup(dec!(1), processor);

        let first = topup
            .apply_confirmation(&account_id, dec!(20), "pi_x", PaymentSource::AutoTopUp)
            .unwrap();
        let second = topup
            .apply_confirmation(&account_id, dec!(20), "pi_x", PaymentSource::AutoTopUp)
            .unwrap();

        assert!(matches!(first, TopUpResult::ToppedUp { .. }));
        assert_eq!(
            second,
            TopUpResult::AlreadyApplied {
                balance: dec!(21),
                confirmation_ref: "pi_x".into()
            }
        );
        assert_eq!(store.all_entries(&account_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn confirmation_for_another_account_is_refused() {
        let processor = Arc::new(FakeProcessor::default());
        let (store, topup, account_id) = setup(dec!(1), processor);
        let other = Account::new(AccountId::generate());
        store.create_account(&other).unwrap();

        topup
            .apply_confirmation(&account_id, dec!(20), "pi_x", PaymentSource::Checkout)
            .unwrap();
        let err = topup
            .apply_confirmation(&other.account_id, dec!(20), "pi_x", PaymentSource::Checkout)
            .unwrap_err();

        assert!(matches!(
            err,
            BillingError::DuplicateConfirmation { ref confirmation_ref } if confirmation_ref == "pi_x"
        ));
        assert_eq!(store.get_balance(&other.account_id).unwrap(), dec!(0));
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(21));
    }

    #[tokio::test]
    async fn processor_failure_is_soft() {
        let processor = Arc::new(FakeProcessor {
            fail: true,
            ..FakeProcessor::default()
        });
        let (store, topup, account_id) = setup(dec!(1), processor);

        let result = topup.maybe_top_up(&account_id).await.unwrap();
        assert!(matches!(result, TopUpResult::Failed { .. }));
        assert_eq!(store.get_balance(&account_id).unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn missing_payment_method_is_reported() {
        let processor = Arc::new(FakeProcessor::default());
        let (store, topup, account_id) = setup(dec!(1), processor);
        let mut settings = store.get_account(&account_id).unwrap().unwrap().settings;
        settings.payment_method = None;
        store.update_settings(&account_id, &settings).unwrap();

        let result = topup.maybe_top_up(&account_id).await.unwrap();
        assert_eq!(result, TopUpResult::PaymentMethodMissing);
    }
}
