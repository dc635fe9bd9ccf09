//! Admin handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, LedgerEntry, NewEntry, PricingTable};
use tally_store::Reconciliation;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::ledger::WelcomeBonus;
use crate::state::AppState;

/// Welcome bonus grant request.
#[derive(Debug, Deserialize)]
pub struct GrantWelcomeRequest {
    /// Account to credit.
    pub account_id: AccountId,
}

/// Grant the welcome bonus (no-op if already granted).
pub async fn grant_welcome_bonus(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<GrantWelcomeRequest>,
) -> Result<Json<WelcomeBonus>, ApiError> {
    let outcome = state.ledger.bonus.issue_welcome_bonus(&body.account_id)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %body.account_id,
        outcome = ?outcome,
        "Admin welcome bonus"
    );
    Ok(Json(outcome))
}

/// Kind of manual entry.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Positive credit reversing earlier usage.
    Refund,
    /// Signed correction.
    Adjustment,
}

/// Manual entry request.
#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    /// Account to adjust.
    pub account_id: AccountId,
    /// Entry kind.
    pub kind: AdjustmentKind,
    /// Amount; refunds must be positive, adjustments may be negative.
    pub amount: Decimal,
    /// Reason recorded on the entry.
    pub reason: String,
}

/// Append a refund or adjustment entry.
pub async fn create_adjustment(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustmentRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("A reason is required".into()));
    }
    let reason = format!("{} (by {})", body.reason.trim(), admin.admin_id);
    let entry = match body.kind {
        AdjustmentKind::Refund => {
            if body.amount <= Decimal::ZERO {
                return Err(ApiError::BadRequest("Refunds must be positive".into()));
            }
            NewEntry::refund(body.account_id, body.amount, reason)
        }
        AdjustmentKind::Adjustment => NewEntry::adjustment(body.account_id, body.amount, reason),
    };

    let committed = state.store.append(&entry)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %body.account_id,
        kind = %committed.kind,
        amount = %committed.amount,
        balance = %committed.balance_after,
        "Admin ledger entry"
    );
    Ok(Json(committed))
}

/// Replay an account's log, check it and repair the cached balance.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(account_id): Path<String>,
) -> Result<Json<Reconciliation>, ApiError> {
    let account_id: AccountId = account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;
    let report = state.store.reconcile(&account_id)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %account_id,
        consistent = report.consistent,
        repaired = report.repaired,
        "Admin reconciliation"
    );
    Ok(Json(report))
}

/// Pricing update response.
#[derive(Debug, Serialize)]
pub struct PricingResponse {
    /// Version assigned to the new table.
    pub version: u32,
}

/// Replace the pricing table. Existing usage keeps its recorded prices.
pub async fn put_pricing(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(table): Json<PricingTable>,
) -> Result<Json<PricingResponse>, ApiError> {
    let version = state
        .ledger
        .meter
        .replace(table)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!(admin_id = %admin.admin_id, version, "Admin pricing update");
    Ok(Json(PricingResponse { version }))
}
