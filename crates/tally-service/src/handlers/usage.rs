//! Usage handlers for the AI runtime.
//!
//! The runtime calls `authorize` before an operation, then exactly one of
//! `settle` (completed) or `fail` (failed or cancelled).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use tally_core::{AccountId, UsageRecord};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::ledger::{Authorization, RefusalReason, Settlement, UsageReport};
use crate::state::AppState;

/// Authorization request.
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    /// Account to charge.
    pub account_id: AccountId,
    /// Model to be used.
    pub model: String,
    /// Prompt size in tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
}

/// Check whether an operation may start.
///
/// Refusals for lack of credits are `402` with the balance and estimate in
/// the error details; a disabled account is `403`.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<AuthorizeRequest>,
) -> Result<Json<Authorization>, ApiError> {
    let authorization = state
        .ledger
        .policy
        .authorize(&body.account_id, &body.model, body.prompt_tokens)
        .await?;

    tracing::debug!(
        service = %service.service_name,
        account_id = %body.account_id,
        authorized = authorization.authorized,
        estimate = %authorization.estimate,
        "Usage authorization"
    );

    match authorization.reason {
        None => Ok(Json(authorization)),
        Some(RefusalReason::InsufficientCredits) => Err(ApiError::InsufficientCredits {
            balance: authorization.balance,
            required: authorization.estimate,
        }),
        Some(RefusalReason::AccountDisabled) => Err(ApiError::Forbidden(format!(
            "account disabled: {}",
            body.account_id
        ))),
    }
}

/// Settle a completed operation.
pub async fn settle(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(report): Json<UsageReport>,
) -> Result<Json<Settlement>, ApiError> {
    tracing::debug!(
        service = %service.service_name,
        account_id = %report.account_id,
        model = %report.model,
        "Settling usage"
    );
    Ok(Json(state.ledger.policy.settle(report).await?))
}

/// Record a failed or cancelled operation.
pub async fn fail(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(report): Json<UsageReport>,
) -> Result<Json<UsageRecord>, ApiError> {
    Ok(Json(state.ledger.policy.record_failure(report)?))
}
