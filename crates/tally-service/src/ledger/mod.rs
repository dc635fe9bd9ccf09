//! Credit ledger services built on top of a [`Store`].
//!
//! - [`UsageMeter`] prices tokens with a versioned table
//! - [`CreditPolicy`] authorizes and settles AI operations
//! - [`AutoTopUp`] buys credits when a balance runs low
//! - [`BonusIssuer`] pays welcome and referral bonuses
//! - [`BillingAggregator`] rebuilds monthly summaries

mod bonus;
mod events;
mod meter;
mod periods;
mod policy;
mod reconcile;
mod topup;

use std::sync::Arc;

use tally_core::{PricingTable, Result};
use tally_store::Store;

pub use bonus::{BonusConfig, BonusIssuer, WelcomeBonus};
pub use events::{BalanceChanged, BalanceEvents, BalanceListener};
pub use meter::{Quote, UsageMeter};
pub use periods::BillingAggregator;
pub use policy::{
    Authorization, BalanceSummary, CreditPolicy, PolicyConfig, RefusalReason, Settlement,
    UsageReport,
};
pub use reconcile::{reconcile_all, spawn_reconciler};
pub use topup::{AutoTopUp, PaymentSource, TopUpResult};

use crate::payments::PaymentProcessor;

/// Everything needed to assemble a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Initial pricing table.
    pub pricing: PricingTable,
    /// Settlement policy.
    pub policy: PolicyConfig,
    /// Bonus amounts.
    pub bonus: BonusConfig,
}

/// The wired-up ledger services sharing one store.
pub struct Ledger {
    /// Backing store.
    pub store: Arc<dyn Store>,
    /// Pricing.
    pub meter: Arc<UsageMeter>,
    /// Authorization and settlement.
    pub policy: CreditPolicy,
    /// Auto-top-up orchestrator, also subscribed to balance changes.
    pub topup: Arc<AutoTopUp>,
    /// Bonuses.
    pub bonus: BonusIssuer,
    /// Monthly summaries.
    pub periods: BillingAggregator,
}

impl Ledger {
    /// Wire the services together.
    ///
    /// Auto-top-up is registered as a balance listener, so every settled
    /// debit triggers a background threshold check.
    pub fn new(
        store: Arc<dyn Store>,
        processor: Option<Arc<dyn PaymentProcessor>>,
        config: LedgerConfig,
    ) -> Result<Self> {
        let meter = Arc::new(UsageMeter::new(config.pricing)?);
        let topup = Arc::new(AutoTopUp::new(Arc::clone(&store), processor));

        let mut events = BalanceEvents::new();
        events.subscribe(Arc::clone(&topup) as Arc<dyn BalanceListener>);

        Ok(Self {
            policy: CreditPolicy::new(
                Arc::clone(&store),
                Arc::clone(&meter),
                Arc::clone(&topup),
                events,
                config.policy,
            ),
            bonus: BonusIssuer::new(Arc::clone(&store), config.bonus),
            periods: BillingAggregator::new(Arc::clone(&store)),
            store,
            meter,
            topup,
        })
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("meter", &self.meter)
            .field("policy", &self.policy)
            .field("topup", &self.topup)
            .finish_non_exhaustive()
    }
}
