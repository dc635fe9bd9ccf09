//! Credit balance and transaction handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::LedgerEntry;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::accounts::load_account;
use crate::ledger::BalanceSummary;
use crate::state::AppState;

/// Smallest checkout purchase, in USD.
const MIN_PURCHASE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Largest checkout purchase, in USD.
const MAX_PURCHASE: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Get current balance with monthly and lifetime spend.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceSummary>, ApiError> {
    Ok(Json(state.ledger.policy.balance_summary(&auth.account_id)?))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Ledger entries (newest first).
    pub transactions: Vec<LedgerEntry>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    load_account(&state, &auth.account_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.clamp(1, 100);
    let mut transactions = state
        .store
        .list_entries(&auth.account_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Purchase credits request.
#[derive(Debug, Deserialize)]
pub struct PurchaseCreditsRequest {
    /// Amount in USD to purchase. Credits are granted 1:1.
    pub amount: Decimal,
}

/// Purchase credits response.
#[derive(Debug, Serialize)]
pub struct PurchaseCreditsResponse {
    /// Stripe checkout session URL.
    pub checkout_url: String,
    /// Session ID for tracking.
    pub session_id: String,
}

/// Initiate a credit purchase via Stripe Checkout.
///
/// Credits land when the `checkout.session.completed` webhook arrives.
pub async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PurchaseCreditsRequest>,
) -> Result<Json<PurchaseCreditsResponse>, ApiError> {
    if body.amount < MIN_PURCHASE {
        return Err(ApiError::BadRequest(format!(
            "Minimum purchase is ${MIN_PURCHASE}"
        )));
    }
    if body.amount > MAX_PURCHASE {
        return Err(ApiError::BadRequest(format!(
            "Maximum purchase is ${MAX_PURCHASE}"
        )));
    }

    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Stripe not configured".into()))?;

    let account = load_account(&state, &auth.account_id)?;
    if account.is_disabled() {
        return Err(ApiError::Forbidden("Account disabled".into()));
    }

    tracing::info!(
        account_id = %auth.account_id,
        amount = %body.amount,
        "Initiating credit purchase"
    );

    let success_url = format!(
        "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
        state.config.frontend_url
    );
    let cancel_url = format!("{}/billing/cancel", state.config.frontend_url);
    let customer = account
        .settings
        .payment_method
        .as_ref()
        .and_then(|pm| pm.customer_ref.as_deref());

    let session = stripe
        .create_checkout_session(customer, &auth.account_id, body.amount, &success_url, &cancel_url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create checkout session");
            ApiError::ExternalService(format!("Failed to create checkout session: {e}"))
        })?;

    let checkout_url = session
        .url
        .ok_or_else(|| ApiError::ExternalService("Checkout session has no URL".into()))?;

    Ok(Json(PurchaseCreditsResponse {
        checkout_url,
        session_id: session.id,
    }))
}
