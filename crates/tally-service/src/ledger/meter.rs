//! Usage pricing with a hot-swappable, versioned table.

use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;
use serde::Serialize;
use tally_core::{PricingTable, Result};

/// A cost together with the table version that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Cost in USD, rounded to credit precision.
    pub cost: Decimal,
    /// Pricing table version used.
    pub pricing_version: u32,
}

/// Converts token counts to credit costs.
///
/// Readers take a snapshot of the current table, so a concurrent
/// [`UsageMeter::replace`] never mixes prices from two versions.
#[derive(Debug)]
pub struct UsageMeter {
    table: RwLock<Arc<PricingTable>>,
}

impl UsageMeter {
    /// Create a meter with an initial table.
    pub fn new(table: PricingTable) -> Result<Self> {
        table.validate()?;
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Snapshot of the current table.
    #[must_use]
    pub fn current(&self) -> Arc<PricingTable> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Pessimistic cost for a request of `prompt_tokens` before it runs.
    pub fn estimate_cost(&self, model: &str, prompt_tokens: u64) -> Result<Quote> {
        let table = self.current();
        Ok(Quote {
            cost: table.estimate_cost(model, prompt_tokens)?,
            pricing_version: table.version,
        })
    }

    /// Cost of a completed operation.
    pub fn compute_actual_cost(&self, model: &str, tokens_in: u64, tokens_out: u64) -> Result<Quote> {
        let table = self.current();
        Ok(Quote {
            cost: table.actual_cost(model, tokens_in, tokens_out)?,
            pricing_version: table.version,
        })
    }

    /// Install a new table and return its version.
    ///
    /// The installed version is always one past the current version,
    /// whatever `table.version` says, so versions stay monotonic.
    pub fn replace(&self, mut table: PricingTable) -> Result<u32> {
        table.validate()?;
        let mut current = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.version = current.version + 1;
        let version = table.version;
        *current = Arc::new(table);
        tracing::info!(version, "Pricing table replaced");
        Ok(version)
    }
}
