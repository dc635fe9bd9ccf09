//! Monthly usage summaries.

use std::sync::Arc;

use tally_core::{AccountId, BillingError, BillingPeriod, Result, YearMonth};
use tally_store::Store;

/// Rebuilds billing periods from usage records.
///
/// Periods are reporting caches. Nothing reads them to make a charging
/// decision, so refreshing is always safe.
pub struct BillingAggregator {
    store: Arc<dyn Store>,
}

impl BillingAggregator {
    /// Create an aggregator.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute and store the period for one account and month.
    pub fn refresh(&self, account_id: &AccountId, year_month: YearMonth) -> Result<BillingPeriod> {
        if self.store.get_account(account_id)?.is_none() {
            return Err(BillingError::AccountNotFound {
                account_id: account_id.to_string(),
            });
        }

        let records = self
            .store
            .list_usage(account_id, year_month.start(), year_month.end())?;
        let period = BillingPeriod::summarize(*account_id, year_month, &records);
        self.store.put_billing_period(&period)?;

        tracing::debug!(
            account_id = %account_id,
            year_month = %year_month,
            operations = period.operation_count,
            total = %period.total_usage_cost,
            "Billing period refreshed"
        );
        Ok(period)
    }
}

impl std::fmt::Debug for BillingAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingAggregator").finish_non_exhaustive()
    }
}
