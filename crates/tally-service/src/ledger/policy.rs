//! Authorize, settle, and fail metered AI operations.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    AccountId, BillingError, EntryKind, LedgerEntry, NewEntry, Result, UsageId, UsageRecord,
    YearMonth,
};
use tally_store::{Store, StoreError};

use super::events::{BalanceChanged, BalanceEvents};
use super::meter::UsageMeter;
use super::topup::{AutoTopUp, TopUpResult};

/// Maximum attempts for a settlement hitting transient store errors.
const SETTLE_MAX_RETRIES: u32 = 3;

/// Initial backoff between settlement attempts.
const SETTLE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Backoff ceiling.
const SETTLE_MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// Tunables for [`CreditPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Append a settlement that would overdraw instead of rejecting it.
    pub allow_settlement_overdraft: bool,
    /// Attempts before a settlement is reported as failed.
    pub settle_max_retries: u32,
    /// First retry delay.
    pub settle_initial_backoff: Duration,
    /// Upper bound on the retry delay.
    pub settle_max_backoff: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_settlement_overdraft: false,
            settle_max_retries: SETTLE_MAX_RETRIES,
            settle_initial_backoff: SETTLE_INITIAL_BACKOFF,
            settle_max_backoff: SETTLE_MAX_BACKOFF,
        }
    }
}

/// Why an operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// Balance is below the estimate, even after any top-up.
    InsufficientCredits,
    /// The account is disabled.
    AccountDisabled,
}

/// Answer to "may this account start an operation?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    /// Whether the operation may run.
    pub authorized: bool,
    /// Why not, when refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    /// Estimated cost.
    pub estimate: Decimal,
    /// Balance at decision time.
    pub balance: Decimal,
    /// Synchronous top-up attempted during the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_up: Option<TopUpResult>,
}

/// A finished (or failed) AI operation reported by the runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageReport {
    /// Caller-chosen ID, reused on retries. Generated when absent.
    #[serde(default)]
    pub usage_id: Option<UsageId>,
    /// The charged account.
    pub account_id: AccountId,
    /// Operation name (e.g. "chat").
    pub operation: String,
    /// Model name.
    pub model: String,
    /// Input tokens consumed.
    #[serde(default)]
    pub tokens_in: u64,
    /// Output tokens produced.
    #[serde(default)]
    pub tokens_out: u64,
}

/// Result of settling a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// The stored usage record.
    pub record: UsageRecord,
    /// The debit, absent only for zero-cost usage.
    pub entry: Option<LedgerEntry>,
    /// Balance after settlement.
    pub balance: Decimal,
    /// True when this usage ID had already been settled.
    pub replayed: bool,
}

/// Spend figures derived from an account's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    /// Current balance.
    pub balance: Decimal,
    /// Usage debits in the current calendar month.
    pub monthly_spent: Decimal,
    /// Usage debits over the account's lifetime.
    pub total_spent: Decimal,
}

/// The authorize, execute, settle protocol around AI operations.
pub struct CreditPolicy {
    store: Arc<dyn Store>,
    meter: Arc<UsageMeter>,
    topup: Arc<AutoTopUp>,
    events: BalanceEvents,
    config: PolicyConfig,
}

impl CreditPolicy {
    /// Create the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        meter: Arc<UsageMeter>,
        topup: Arc<AutoTopUp>,
        events: BalanceEvents,
        config: PolicyConfig,
    ) -> Self {
        Self {
            store,
            meter,
            topup,
            events,
            config,
        }
    }

    /// Decide whether an operation of `prompt_tokens` may start.
    ///
    /// Nothing is reserved; the check is advisory and settlement is the
    /// authoritative debit.
    pub async fn authorize(
        &self,
        account_id: &AccountId,
        model: &str,
        prompt_tokens: u64,
    ) -> Result<Authorization> {
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| BillingError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;
        let estimate = self.meter.estimate_cost(model, prompt_tokens)?.cost;
        let mut balance = self.store.get_balance(account_id)?;

        if account.is_disabled() {
            return Ok(Authorization {
                authorized: false,
                reason: Some(RefusalReason::AccountDisabled),
                estimate,
                balance,
                top_up: None,
            });
        }

        if balance >= estimate {
            return Ok(Authorization {
                authorized: true,
                reason: None,
                estimate,
                balance,
                top_up: None,
            });
        }

        let mut top_up = None;
        if account.settings.can_auto_top_up() {
            let result = self.topup.maybe_top_up(account_id).await?;
            balance = self.store.get_balance(account_id)?;
            top_up = Some(result);
        }

        let authorized = balance >= estimate;
        if !authorized {
            tracing::debug!(
                account_id = %account_id,
                balance = %balance,
                estimate = %estimate,
                "Authorization refused"
            );
        }

        Ok(Authorization {
            authorized,
            reason: (!authorized).then_some(RefusalReason::InsufficientCredits),
            estimate,
            balance,
            top_up,
        })
    }

    /// Charge a completed operation.
    ///
    /// Idempotent per usage ID: settling an ID again returns the original
    /// entry with `replayed` set. After a successful debit, balance listeners
    /// (auto-top-up) run in the background.
    pub async fn settle(&self, report: UsageReport) -> Result<Settlement> {
        let usage_id = report.usage_id.unwrap_or_else(UsageId::generate);

        if let Some(existing) = self.replay(&usage_id)? {
            return Ok(existing);
        }

        if self.store.get_account(&report.account_id)?.is_none() {
            return Err(BillingError::AccountNotFound {
                account_id: report.account_id.to_string(),
            });
        }

        let quote = self
            .meter
            .compute_actual_cost(&report.model, report.tokens_in, report.tokens_out)?;
        let record = UsageRecord::completed(
            usage_id,
            report.account_id,
            report.operation,
            report.model,
            report.tokens_in,
            report.tokens_out,
            quote.cost,
            quote.pricing_version,
        );

        if quote.cost.is_zero() {
            return self.record_free_usage(record);
        }

        let mut entry = NewEntry::usage(
            record.account_id,
            record.cost,
            usage_id,
            record.ledger_description(),
        );
        let mut attempt = 0;
        let mut backoff = self.config.settle_initial_backoff;
        let mut topped_up = false;

        loop {
            match self.store.settle_usage(&record, &entry) {
                Ok(committed) => {
                    tracing::info!(
                        account_id = %record.account_id,
                        usage_id = %usage_id,
                        cost = %record.cost,
                        balance = %committed.balance_after,
                        overdraft = entry.overdraft_authorized,
                        "Usage settled"
                    );
                    drop(self.events.publish(&BalanceChanged::from(&committed)));
                    return Ok(Settlement {
                        balance: committed.balance_after,
                        record,
                        entry: Some(committed),
                        replayed: false,
                    });
                }
                Err(StoreError::DuplicateUsage { .. }) => {
                    // A concurrent call settled the same ID first.
                    return self.replay(&usage_id)?.ok_or_else(|| BillingError::DuplicateUsage {
                        usage_id: usage_id.to_string(),
                    });
                }
                Err(StoreError::WouldGoNegative { balance, required }) => {
                    if !topped_up {
                        topped_up = true;
                        let result = self.topup.maybe_top_up(&record.account_id).await?;
                        if result.is_credited() {
                            continue;
                        }
                    }
                    if self.config.allow_settlement_overdraft && !entry.overdraft_authorized {
                        entry = entry.with_overdraft();
                        continue;
                    }
                    tracing::error!(
                        target: "tally::reconciliation",
                        account_id = %record.account_id,
                        usage_id = %usage_id,
                        balance = %balance,
                        required = %required,
                        "Completed usage rejected for insufficient credits"
                    );
                    return Err(BillingError::InsufficientCredits { balance, required });
                }
                Err(e) if e.is_transient() && attempt + 1 < self.config.settle_max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        usage_id = %usage_id,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Settlement failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.settle_max_backoff);
                }
                Err(e) => {
                    tracing::error!(
                        target: "tally::reconciliation",
                        account_id = %record.account_id,
                        usage_id = %usage_id,
                        cost = %record.cost,
                        error = %e,
                        "Settlement failed, completed usage needs manual reconciliation"
                    );
                    return Err(BillingError::SettlementFailed {
                        usage_id: usage_id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Record a failed or cancelled operation. Nothing is charged.
    pub fn record_failure(&self, report: UsageReport) -> Result<UsageRecord> {
        let usage_id = report.usage_id.unwrap_or_else(UsageId::generate);
        let record = UsageRecord::failed(
            usage_id,
            report.account_id,
            report.operation,
            report.model,
            self.meter.current().version,
        );

        match self.store.record_usage(&record) {
            Ok(()) => {
                tracing::info!(
                    account_id = %record.account_id,
                    usage_id = %usage_id,
                    "Failed usage recorded"
                );
                Ok(record)
            }
            Err(StoreError::DuplicateUsage { .. }) => match self.store.get_usage(&usage_id)? {
                Some(existing) if !existing.is_completed() => Ok(existing),
                _ => Err(BillingError::DuplicateUsage {
                    usage_id: usage_id.to_string(),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Balance plus monthly and lifetime usage spend.
    pub fn balance_summary(&self, account_id: &AccountId) -> Result<BalanceSummary> {
        if self.store.get_account(account_id)?.is_none() {
            return Err(BillingError::AccountNotFound {
                account_id: account_id.to_string(),
            });
        }

        let entries = self.store.all_entries(account_id)?;
        let month = YearMonth::current();
        let mut monthly_spent = Decimal::ZERO;
        let mut total_spent = Decimal::ZERO;

        for entry in entries.iter().filter(|e| e.kind == EntryKind::Usage) {
            let spent = -entry.amount;
            total_spent += spent;
            if month.contains(entry.created_at) {
                monthly_spent += spent;
            }
        }

        Ok(BalanceSummary {
            balance: entries.last().map_or(Decimal::ZERO, |e| e.balance_after),
            monthly_spent,
            total_spent,
        })
    }

    /// The settlement already stored for `usage_id`, if any.
    fn replay(&self, usage_id: &UsageId) -> Result<Option<Settlement>> {
        let Some(record) = self.store.get_usage(usage_id)? else {
            return Ok(None);
        };
        if !record.is_completed() {
            return Err(BillingError::DuplicateUsage {
                usage_id: usage_id.to_string(),
            });
        }

        let entry = self.store.find_entry_by_usage(usage_id)?;
        let balance = self.store.get_balance(&record.account_id)?;
        tracing::debug!(usage_id = %usage_id, "Usage already settled, replaying");
        Ok(Some(Settlement {
            record,
            entry,
            balance,
            replayed: true,
        }))
    }

    fn record_free_usage(&self, record: UsageRecord) -> Result<Settlement> {
        match self.store.record_usage(&record) {
            Ok(()) => Ok(Settlement {
                balance: self.store.get_balance(&record.account_id)?,
                record,
                entry: None,
                replayed: false,
            }),
            Err(StoreError::DuplicateUsage { .. }) => {
                self.replay(&record.id)?
                    .ok_or_else(|| BillingError::DuplicateUsage {
                        usage_id: record.id.to_string(),
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for CreditPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditPolicy")
            .field("meter", &self.meter)
            .field("events", &self.events)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_core::{
        Account, AccountSettings, AutoTopUpSettings, ModelPricing, PaymentMethod, PricingTable,
    };
    use tally_store::memory::MemoryStore;

    struct ApprovingProcessor(AtomicUsize);

    #[async_trait::async_trait]
    impl PaymentProcessor for ApprovingProcessor {
        async fn charge(
            &self,
            request: &ChargeRequest,
        ) -> std::result::Result<ChargeOutcome, PaymentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ChargeOutcome {
                confirmation_ref: format!("pi_{}", request.idempotency_key),
                status: ChargeStatus::Succeeded,
            })
        }
    }

    /// One dollar per million tokens in and out, no output allowance.
    fn flat_table() -> PricingTable {
        let mut table = PricingTable {
            default_model: "flat".into(),
            estimate_output_tokens: 0,
            ..PricingTable::default()
        };
        table
            .models
            .insert("flat".into(), ModelPricing::per_million(dec!(1), dec!(1)));
        table
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        policy: CreditPolicy,
        processor: Arc<ApprovingProcessor>,
        account_id: AccountId,
    }

    fn fixture(balance: Decimal, auto_top_up: bool, config: PolicyConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let account = Account::new(AccountId::generate());
        let account_id = account.account_id;
        store.create_account(&account).unwrap();
        if auto_top_up {
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
                            customer_ref: None,
                        }),
                        disabled: false,
                    },
                )
                .unwrap();
        }
        if !balance.is_zero() {
            store
                .append(&NewEntry::adjustment(account_id, balance, "seed".into()))
                .unwrap();
        }

        let processor = Arc::new(ApprovingProcessor(AtomicUsize::new(0)));
        let meter = Arc::new(UsageMeter::new(flat_table()).unwrap());
        let topup = Arc::new(AutoTopUp::new(store.clone(), Some(processor.clone())));
        let policy = CreditPolicy::new(store.clone(), meter, topup, BalanceEvents::new(), config);
        Fixture {
            store,
            policy,
            processor,
            account_id,
        }
    }

    fn report(account_id: AccountId, tokens_in: u64, tokens_out: u64) -> UsageReport {
        UsageReport {
            usage_id: None,
            account_id,
            operation: "chat".into(),
            model: "flat".into(),
            tokens_in,
            tokens_out,
        }
    }

    #[tokio::test]
    async fn authorize_checks_estimate_against_balance() {
        let f = fixture(dec!(1), false, PolicyConfig::default());

        let ok = f.policy.authorize(&f.account_id, "flat", 1_000_000).await.unwrap();
        assert!(ok.authorized);
        assert_eq!(ok.estimate, dec!(1));

        let refused = f.policy.authorize(&f.account_id, "flat", 2_000_000).await.unwrap();
        assert!(!refused.authorized);
        assert_eq!(refused.reason, Some(RefusalReason::InsufficientCredits));
        assert_eq!(serde_json::to_value(&refused).unwrap()["reason"], "insufficient_credits");
        assert!(refused.top_up.is_none());
    }

    #[tokio::test]
    async fn authorize_tops_up_synchronously() {
        let f = fixture(dec!(1), true, PolicyConfig::default());

        let auth = f.policy.authorize(&f.account_id, "flat", 2_000_000).await.unwrap();
        assert!(auth.authorized);
        assert_eq!(auth.balance, dec!(21));
        assert!(matches!(auth.top_up, Some(TopUpResult::ToppedUp { .. })));
    }

    #[tokio::test]
    async fn authorize_unknown_account_is_an_error() {
        let f = fixture(dec!(1), false, PolicyConfig::default());
        let err = f
            .policy
            .authorize(&AccountId::generate(), "flat", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn disabled_account_is_refused_as_disabled() {
        let f = fixture(dec!(0), false, PolicyConfig::default());
        let mut settings = f.store.get_account(&f.account_id).unwrap().unwrap().settings;
        settings.disabled = true;
        f.store.update_settings(&f.account_id, &settings).unwrap();

        let auth = f.policy.authorize(&f.account_id, "flat", 1_000).await.unwrap();
        assert!(!auth.authorized);
        assert_eq!(auth.reason, Some(RefusalReason::AccountDisabled));
    }

    #[tokio::test]
    async fn settle_debits_actual_cost_once() {
        let f = fixture(dec!(10), false, PolicyConfig::default());
        let usage_id = UsageId::generate();
        let mut report = report(f.account_id, 1_000_000, 500_000);
        report.usage_id = Some(usage_id);

        let first = f.policy.settle(report.clone()).await.unwrap();
        assert_eq!(first.entry.as_ref().unwrap().amount, dec!(-1.5));
        assert_eq!(first.balance, dec!(8.5));
        assert!(!first.replayed);

        let second = f.policy.settle(report).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.entry, first.entry);
        assert_eq!(f.store.get_balance(&f.account_id).unwrap(), dec!(8.5));
    }

    #[tokio::test]
    async fn settle_rejects_overdraw_without_top_up() {
        let f = fixture(dec!(1), false, PolicyConfig::default());

        let err = f.policy.settle(report(f.account_id, 2_000_000, 0)).await.unwrap_err();
        assert!(matches!(err, BillingError::InsufficientCredits { .. }));
        assert_eq!(f.store.get_balance(&f.account_id).unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn settle_tops_up_before_rejecting() {
        let f = fixture(dec!(1), true, PolicyConfig::default());

        let settlement = f.policy.settle(report(f.account_id, 2_000_000, 0)).await.unwrap();
        assert_eq!(settlement.balance, dec!(19));
        assert_eq!(f.processor.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settle_overdraft_when_allowed() {
        let config = PolicyConfig {
            allow_settlement_overdraft: true,
            ..PolicyConfig::default()
        };
        let f = fixture(dec!(1), false, config);

        let settlement = f.policy.settle(report(f.account_id, 2_000_000, 0)).await.unwrap();
        assert_eq!(settlement.balance, dec!(-1));
    }

    #[tokio::test]
    async fn zero_cost_usage_is_recorded_without_entry() {
        let f = fixture(dec!(1), false, PolicyConfig::default());

        let settlement = f.policy.settle(report(f.account_id, 0, 0)).await.unwrap();
        assert!(settlement.entry.is_none());
        assert!(f.store.get_usage(&settlement.record.id).unwrap().is_some());
        assert_eq!(f.store.all_entries(&f.account_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_records_nothing_on_the_ledger() {
        let f = fixture(dec!(1), false, PolicyConfig::default());

        let record = f.policy.record_failure(report(f.account_id, 0, 0)).unwrap();
        assert!(!record.is_completed());
        assert_eq!(f.store.all_entries(&f.account_id).unwrap().len(), 1);

        let mut retry = report(f.account_id, 10, 10);
        retry.usage_id = Some(record.id);
        let err = f.policy.settle(retry).await.unwrap_err();
        assert!(matches!(err, BillingError::DuplicateUsage { .. }));
    }

    #[tokio::test]
    async fn balance_summary_counts_usage_only() {
        let f = fixture(dec!(10), false, PolicyConfig::default());
        f.policy.settle(report(f.account_id, 1_000_000, 0)).await.unwrap();
        f.policy.settle(report(f.account_id, 2_000_000, 0)).await.unwrap();
        f.store
            .append(&NewEntry::refund(f.account_id, dec!(1), "goodwill".into()))
            .unwrap();

        let summary = f.policy.balance_summary(&f.account_id).unwrap();
        assert_eq!(summary.balance, dec!(8));
        assert_eq!(summary.total_spent, dec!(3));
        assert_eq!(summary.monthly_spent, dec!(3));
    }
}
