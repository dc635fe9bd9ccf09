//! Tally HTTP API service.
//!
//! Prepaid AI usage credits on an append-only ledger:
//!
//! - Accounts, balances and transaction history
//! - Pre-flight authorization and settlement of metered AI operations
//! - Checkout purchases, auto-top-up and Stripe webhooks
//! - Welcome and referral bonuses
//! - Monthly billing summaries and ledger reconciliation
//!
//! # Authentication
//!
//! 1. **User JWTs** (HS256, `sub` is the account id) for account endpoints
//! 2. **Service API keys** (`x-api-key`) for usage reporting
//! 3. **Admin API keys** (`x-admin-key`) for bonuses, adjustments and pricing

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Axum handlers must be async

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod payments;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use payments::{ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
