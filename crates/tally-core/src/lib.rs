//! Core types and utilities for tally.
//!
//! This crate provides the foundational types of the AI usage credit ledger:
//!
//! - **Identifiers**: `AccountId`, `EntryId`, `UsageId`
//! - **Accounts**: `Account`, `AccountSettings`, `AutoTopUpSettings`
//! - **Ledger**: `LedgerEntry`, `NewEntry`, `EntryKind`
//! - **Usage**: `UsageRecord`, `UsageStatus`
//! - **Pricing**: `PricingTable`, `ModelPricing`
//! - **Reporting**: `BillingPeriod`, `YearMonth`
//! - **Referrals**: `ReferralCode`, `ReferralRecord`
//!
//! # Credit Unit
//!
//! Credits are a decimal dollar-equivalent (`rust_decimal::Decimal`), kept to
//! six decimal places. A $10.00 welcome bonus is `10.00` credits; an extraction
//! billed at $0.018 debits `0.018`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod billing;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod pricing;
pub mod referral;
pub mod usage;

pub use account::{
    Account, AccountSettings, AutoTopUpSettings, PaymentMethod, DEFAULT_AUTO_TOP_UP_AMOUNT,
    DEFAULT_AUTO_TOP_UP_THRESHOLD,
};
pub use billing::{BillingPeriod, YearMonth};
pub use error::{BillingError, Result};
pub use ids::{AccountId, EntryId, IdError, UsageId};
pub use ledger::{replay_balance, EntryKind, LedgerEntry, NewEntry};
pub use money::{format_credits, round_credits, CREDIT_SCALE};
pub use pricing::{ModelPricing, PricingTable};
pub use referral::{ReferralCode, ReferralRecord, REFERRAL_CODE_LEN};
pub use usage::{UsageRecord, UsageStatus};
