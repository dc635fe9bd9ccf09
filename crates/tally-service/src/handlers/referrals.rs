//! Referral handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::accounts::load_account;
use crate::state::AppState;

/// Referral code response.
#[derive(Debug, Serialize)]
pub struct ReferralCodeResponse {
    /// Shareable code.
    pub code: String,
    /// When the code was created.
    pub created_at: String,
}

/// Get (or lazily create) the caller's referral code.
pub async fn get_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ReferralCodeResponse>, ApiError> {
    load_account(&state, &auth.account_id)?;
    let code = state.ledger.bonus.referral_code(&auth.account_id)?;
    Ok(Json(ReferralCodeResponse {
        code: code.code,
        created_at: code.created_at.to_rfc3339(),
    }))
}

/// Redeem request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Code shared by the referrer.
    pub code: String,
}

/// Redeem response.
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    /// The redeemed code, normalized.
    pub code: String,
    /// Always true on success.
    pub redeemed: bool,
}

/// Redeem a referral code for the caller. The referrer receives the bonus.
pub async fn redeem(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    state
        .ledger
        .bonus
        .redeem_referral(&auth.account_id, &body.code)?;
    Ok(Json(RedeemResponse {
        code: tally_core::ReferralCode::normalize(&body.code),
        redeemed: true,
    }))
}
