//! Outbound payment processor interface.
//!
//! The ledger never talks to a payment provider directly. Auto-top-up goes
//! through [`PaymentProcessor`], implemented by the Stripe client in
//! production and by fakes in tests.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, PaymentMethod};

/// A request to charge a stored payment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Account being topped up.
    pub account_id: AccountId,
    /// Payment method on file.
    pub payment_method: PaymentMethod,
    /// Amount in USD.
    pub amount: Decimal,
    /// Key that makes retried charges collapse into one at the processor.
    pub idempotency_key: String,
}

/// Processor-side state of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Funds captured; safe to credit.
    Succeeded,
    /// Accepted but not settled; a webhook will confirm it later.
    Pending,
    /// Declined or cancelled.
    Failed,
}

/// Result of a charge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    /// Processor confirmation reference, used as the ledger payment ref.
    pub confirmation_ref: String,
    /// Charge status.
    pub status: ChargeStatus,
}

/// Errors from a payment processor.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The processor refused the charge (card declined and so on).
    #[error("charge declined: {0}")]
    Declined(String),

    /// The processor could not be reached or answered with an error.
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    /// The amount cannot be expressed in the processor's currency unit.
    #[error("invalid charge amount: {0}")]
    InvalidAmount(Decimal),
}

/// Charges stored payment methods.
#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charge `request.amount` against the stored payment method.
    ///
    /// Implementations must forward `idempotency_key` so that two calls with
    /// the same key produce at most one charge.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError>;
}
