//! API handlers.

pub mod accounts;
pub mod admin;
pub mod billing;
pub mod credits;
pub mod health;
pub mod referrals;
pub mod usage;
pub mod webhooks;
