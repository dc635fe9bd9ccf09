//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{format_credits, Account, AccountId, AutoTopUpSettings, PaymentMethod};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::WelcomeBonus;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance, derived from the ledger.
    pub balance: Decimal,
    /// Balance formatted as dollars.
    pub balance_formatted: String,
    /// Auto-top-up configuration.
    pub auto_top_up: AutoTopUpSettings,
    /// Whether a payment method is on file.
    pub payment_method_on_file: bool,
    /// Whether the account is disabled.
    pub disabled: bool,
    /// Created timestamp.
    pub created_at: String,
}

impl AccountResponse {
    fn new(account: &Account, balance: Decimal) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            balance,
            balance_formatted: format_credits(balance),
            auto_top_up: account.settings.auto_top_up.clone(),
            payment_method_on_file: account.settings.payment_method.is_some(),
            disabled: account.settings.disabled,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Referral code shared by an existing account.
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Create account response.
#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    /// The new account.
    #[serde(flatten)]
    pub account: AccountResponse,
    /// Welcome bonus credited, if any.
    pub welcome_bonus: Option<Decimal>,
    /// Whether the referral code was redeemed.
    pub referral_applied: bool,
    /// Why the referral code was not redeemed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_error: Option<String>,
}

/// Register the caller's account, credit the welcome bonus and redeem an
/// optional referral code.
///
/// A bad referral code does not fail signup; it is reported in
/// `referral_error`.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    let account = Account::new(auth.account_id);
    state.store.create_account(&account)?;
    tracing::info!(account_id = %auth.account_id, "Account created");

    let welcome_bonus = match state.ledger.bonus.issue_welcome_bonus(&auth.account_id)? {
        WelcomeBonus::Issued(entry) => Some(entry.amount),
        WelcomeBonus::AlreadyIssued | WelcomeBonus::NotConfigured => None,
    };

    let mut referral_applied = false;
    let mut referral_error = None;
    if let Some(code) = body.referral_code.as_deref().filter(|c| !c.trim().is_empty()) {
        match state.ledger.bonus.redeem_referral(&auth.account_id, code) {
            Ok(_) => referral_applied = true,
            Err(e) => {
                tracing::warn!(account_id = %auth.account_id, code = %code, error = %e, "Referral code not applied");
                referral_error = Some(e.to_string());
            }
        }
    }

    let balance = state.store.get_balance(&auth.account_id)?;
    Ok(Json(CreateAccountResponse {
        account: AccountResponse::new(&account, balance),
        welcome_bonus,
        referral_applied,
        referral_error,
    }))
}

/// Get the caller's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = load_account(&state, &auth.account_id)?;
    let balance = state.store.get_balance(&auth.account_id)?;
    Ok(Json(AccountResponse::new(&account, balance)))
}

/// Auto-top-up configuration request.
#[derive(Debug, Deserialize)]
pub struct AutoTopUpRequest {
    /// Turn auto-top-up on or off.
    pub enabled: bool,
    /// Balance at or below which a top-up fires.
    #[serde(default)]
    pub threshold: Option<Decimal>,
    /// Amount to purchase per top-up.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Configure auto-top-up.
pub async fn configure_auto_top_up(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<AutoTopUpRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = load_account(&state, &auth.account_id)?;
    let mut settings = account.settings;

    if let Some(threshold) = body.threshold {
        if threshold.is_sign_negative() {
            return Err(ApiError::BadRequest("Threshold must not be negative".into()));
        }
        settings.auto_top_up.threshold = threshold;
    }
    if let Some(amount) = body.amount {
        if amount <= Decimal::ZERO || !(amount * Decimal::ONE_HUNDRED).fract().is_zero() {
            return Err(ApiError::BadRequest(
                "Top-up amount must be a positive amount in whole cents".into(),
            ));
        }
        settings.auto_top_up.amount = amount;
    }
    settings.auto_top_up.enabled = body.enabled;

    let updated = state.store.update_settings(&auth.account_id, &settings)?;
    tracing::info!(
        account_id = %auth.account_id,
        enabled = settings.auto_top_up.enabled,
        threshold = %settings.auto_top_up.threshold,
        amount = %settings.auto_top_up.amount,
        "Auto-top-up configured"
    );

    let balance = state.store.get_balance(&auth.account_id)?;
    Ok(Json(AccountResponse::new(&updated, balance)))
}

/// Payment method request. A missing or empty reference clears the method.
#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    /// Processor payment method reference.
    #[serde(default)]
    pub payment_method_ref: Option<String>,
    /// Processor customer reference.
    #[serde(default)]
    pub customer_ref: Option<String>,
}

/// Store or clear the caller's payment method.
pub async fn set_payment_method(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PaymentMethodRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = load_account(&state, &auth.account_id)?;
    let mut settings = account.settings;

    settings.payment_method = body
        .payment_method_ref
        .filter(|r| !r.trim().is_empty())
        .map(|payment_method_ref| PaymentMethod {
            payment_method_ref,
            customer_ref: body.customer_ref,
        });

    let updated = state.store.update_settings(&auth.account_id, &settings)?;
    tracing::info!(
        account_id = %auth.account_id,
        on_file = updated.settings.payment_method.is_some(),
        "Payment method updated"
    );

    let balance = state.store.get_balance(&auth.account_id)?;
    Ok(Json(AccountResponse::new(&updated, balance)))
}

pub(crate) fn load_account(state: &AppState, account_id: &AccountId) -> Result<Account, ApiError> {
    state
        .store
        .get_account(account_id)?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))
}
