//! Stripe integration: Checkout sessions for purchases, off-session
//! `PaymentIntent`s for auto-top-up, and webhook signature checks.

mod client;
pub mod types;

pub use client::{StripeClient, StripeError};
