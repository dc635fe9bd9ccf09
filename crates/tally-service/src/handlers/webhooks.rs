//! Stripe webhook handler.
//!
//! Credits confirmed payments. Stripe retries deliveries, and the ledger's
//! payment-ref uniqueness makes every retry a no-op.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use tally_core::AccountId;

use crate::error::ApiError;
use crate::ledger::{PaymentSource, TopUpResult};
use crate::state::AppState;
use crate::stripe::types::{CheckoutSession, PaymentIntent, WebhookEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Stripe not configured".into()))?;
    if state.config.stripe_webhook_secret.is_none() {
        return Err(ApiError::Unavailable("Webhook secret not configured".into()));
    }

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    stripe.verify_webhook_signature(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSession = parse_object(&event)?;
            handle_checkout_completed(&state, &session)?;
        }
        "payment_intent.succeeded" => {
            let intent: PaymentIntent = parse_object(&event)?;
            handle_payment_succeeded(&state, &intent)?;
        }
        _ => {
            tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &WebhookEvent) -> Result<T, ApiError> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| ApiError::BadRequest(format!("Malformed {} object: {e}", event.event_type)))
}

fn handle_checkout_completed(state: &AppState, session: &CheckoutSession) -> Result<(), ApiError> {
    if session.payment_status.as_deref() != Some("paid") {
        tracing::debug!(session_id = %session.id, status = ?session.payment_status, "Checkout not paid yet");
        return Ok(());
    }

    let account_id = session
        .client_reference_id
        .as_deref()
        .or_else(|| session.metadata.get("account_id").and_then(|v| v.as_str()))
        .ok_or_else(|| ApiError::BadRequest("Checkout session has no account".into()))?;
    let account_id = parse_account(account_id)?;

    let amount = match metadata_amount(&session.metadata) {
        Some(amount) => amount,
        None => session
            .amount_total
            .map(|cents| Decimal::new(cents, 2))
            .ok_or_else(|| ApiError::BadRequest("Checkout session has no amount".into()))?,
    };

    let confirmation_ref = session.payment_intent.as_deref().unwrap_or(&session.id);
    let result = state.ledger.topup.apply_confirmation(
        &account_id,
        amount,
        confirmation_ref,
        PaymentSource::Checkout,
    )?;
    log_result(&account_id, &result);
    Ok(())
}

fn handle_payment_succeeded(state: &AppState, intent: &PaymentIntent) -> Result<(), ApiError> {
    // Checkout payments are credited from the session event.
    if intent.metadata.get("kind").and_then(|v| v.as_str()) != Some("auto_top_up") {
        return Ok(());
    }

    let account_id = intent
        .metadata
        .get("account_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Payment intent has no account".into()))?;
    let account_id = parse_account(account_id)?;
    let amount = metadata_amount(&intent.metadata).unwrap_or_else(|| Decimal::new(intent.amount, 2));

    let result = state.ledger.topup.apply_confirmation(
        &account_id,
        amount,
        &intent.id,
        PaymentSource::AutoTopUp,
    )?;
    log_result(&account_id, &result);
    Ok(())
}

fn metadata_amount(metadata: &serde_json::Value) -> Option<Decimal> {
    metadata
        .get("credits_amount")
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn parse_account(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid account ID: {raw}")))
}

fn log_result(account_id: &AccountId, result: &TopUpResult) {
    match result {
        TopUpResult::AlreadyApplied {
            confirmation_ref, ..
        } => tracing::info!(
            account_id = %account_id,
            confirmation_ref = %confirmation_ref,
            "Webhook payment already credited"
        ),
        other => tracing::info!(account_id = %account_id, result = ?other, "Webhook payment credited"),
    }
}
