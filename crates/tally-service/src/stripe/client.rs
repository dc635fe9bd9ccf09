//! Stripe API client implementation.

use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;

use tally_core::AccountId;

use super::types::{CheckoutSession, PaymentIntent, StripeErrorResponse};
use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::payments::{ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor};

/// Signatures older than this are rejected as replays.
const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Amount has sub-cent precision or is not positive.
    #[error("amount not chargeable in cents: {0}")]
    InvalidAmount(Decimal),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    webhook_secret: Option<String>,
    base_url: String,
}

impl StripeClient {
    /// Stripe API base URL.
    const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `webhook_secret` - Optional webhook signing secret (`whsec_...`)
    pub fn new(
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            webhook_secret,
            base_url: Self::BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root (for test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a Checkout session for purchasing credits.
    ///
    /// Credits are denominated in USD, so `amount` is both the price and
    /// the credit amount recorded in the session metadata.
    pub async fn create_checkout_session(
        &self,
        customer_id: Option<&str>,
        account_id: &AccountId,
        amount: Decimal,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let amount_cents = to_cents(amount)?;
        let account = account_id.to_string();

        let mut params = vec![
            ("mode", "payment".to_string()),
            ("success_url", success_url.to_string()),
            ("cancel_url", cancel_url.to_string()),
            ("client_reference_id", account.clone()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                "Usage credits".to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                amount_cents.to_string(),
            ),
            ("line_items[0][quantity]", "1".to_string()),
            ("metadata[account_id]", account),
            ("metadata[credits_amount]", amount.to_string()),
            ("metadata[kind]", "purchase".to_string()),
        ];

        if let Some(cid) = customer_id {
            params.push(("customer", cid.to_string()));
        }

        tracing::debug!(
            account_id = %account_id,
            amount_cents = %amount_cents,
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create and confirm an off-session `PaymentIntent`.
    ///
    /// Stripe replays the original response for a repeated
    /// `idempotency_key`, so retries never charge twice.
    pub async fn create_off_session_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<PaymentIntent, StripeError> {
        let amount_cents = to_cents(request.amount)?;

        let mut params = vec![
            ("amount", amount_cents.to_string()),
            ("currency", "usd".to_string()),
            (
                "payment_method",
                request.payment_method.payment_method_ref.clone(),
            ),
            ("confirm", "true".to_string()),
            ("off_session", "true".to_string()),
            ("metadata[account_id]", request.account_id.to_string()),
            ("metadata[credits_amount]", request.amount.to_string()),
            ("metadata[kind]", "auto_top_up".to_string()),
        ];
        if let Some(customer) = &request.payment_method.customer_ref {
            params.push(("customer", customer.clone()));
        }

        let response = self
            .client
            .post(format!("{}/payment_intents", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Verify a webhook signature against the current time.
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw request body
    /// * `signature` - Value of the `Stripe-Signature` header
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<(), StripeError> {
        self.verify_webhook_signature_at(payload, signature, chrono::Utc::now().timestamp())
    }

    /// Verify a webhook signature as of `now` (Unix seconds).
    pub fn verify_webhook_signature_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> Result<(), StripeError> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| StripeError::Configuration("Webhook secret not configured".into()))?;

        // Format: t=timestamp,v1=signature,v1=signature2,...
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", ts)) => timestamp = Some(ts),
                Some(("v1", sig)) => signatures.push(sig),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
        let issued_at: i64 = timestamp
            .parse()
            .map_err(|_| StripeError::InvalidSignature)?;
        if (now - issued_at).abs() > WEBHOOK_TOLERANCE_SECONDS || signatures.is_empty() {
            return Err(StripeError::InvalidSignature);
        }

        let signed_payload = format!("{timestamp}.{payload}");
        let expected =
            hmac_sha256_hex(secret, &signed_payload).ok_or(StripeError::InvalidSignature)?;

        if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
            Ok(())
        } else {
            Err(StripeError::InvalidSignature)
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for StripeClient {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        let intent = self
            .create_off_session_payment(request)
            .await
            .map_err(|err| match err {
                StripeError::Api {
                    error_type,
                    message,
                    ..
                } if error_type == "card_error" => PaymentError::Declined(message),
                StripeError::InvalidAmount(amount) => PaymentError::InvalidAmount(amount),
                other => PaymentError::Unavailable(other.to_string()),
            })?;

        let status = match intent.status.as_str() {
            "succeeded" => ChargeStatus::Succeeded,
            "processing" | "requires_capture" => ChargeStatus::Pending,
            _ => ChargeStatus::Failed,
        };

        Ok(ChargeOutcome {
            confirmation_ref: intent.id,
            status,
        })
    }
}

/// Convert a USD amount to whole cents.
fn to_cents(amount: Decimal) -> Result<i64, StripeError> {
    let cents = amount * Decimal::ONE_HUNDRED;
    if amount <= Decimal::ZERO || !cents.fract().is_zero() {
        return Err(StripeError::InvalidAmount(amount));
    }
    cents.to_i64().ok_or(StripeError::InvalidAmount(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signed(secret: &str, payload: &str, timestamp: i64) -> String {
        let sig = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}")).unwrap();
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn client_creation() {
        let client = StripeClient::new("sk_test_xxx", None).unwrap();
        assert!(client.webhook_secret.is_none());
        assert_eq!(client.base_url, StripeClient::BASE_URL);
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(to_cents(dec!(20)).unwrap(), 2000);
        assert_eq!(to_cents(dec!(0.50)).unwrap(), 50);
        assert!(to_cents(dec!(0.001)).is_err());
        assert!(to_cents(dec!(0)).is_err());
        assert!(to_cents(dec!(-5)).is_err());
    }

    #[test]
    fn webhook_signature_is_verified() {
        let client = StripeClient::new("sk_test_xxx", Some("whsec_test".into())).unwrap();
        let payload = r#"{"id":"evt_1"}"#;
        let header = signed("whsec_test", payload, 1_700_000_000);

        assert!(client
            .verify_webhook_signature_at(payload, &header, 1_700_000_010)
            .is_ok());
        assert!(client
            .verify_webhook_signature_at(r#"{"id":"evt_2"}"#, &header, 1_700_000_010)
            .is_err());
    }

    #[test]
    fn stale_or_foreign_signatures_are_rejected() {
        let client = StripeClient::new("sk_test_xxx", Some("whsec_test".into())).unwrap();
        let payload = "{}";

        let stale = signed("whsec_test", payload, 1_700_000_000);
        assert!(client
            .verify_webhook_signature_at(payload, &stale, 1_700_001_000)
            .is_err());

        let foreign = signed("whsec_other", payload, 1_700_000_000);
        assert!(client
            .verify_webhook_signature_at(payload, &foreign, 1_700_000_000)
            .is_err());

        assert!(client
            .verify_webhook_signature_at(payload, "v1=abc", 1_700_000_000)
            .is_err());
    }

    #[test]
    fn missing_webhook_secret_is_a_configuration_error() {
        let client = StripeClient::new("sk_test_xxx", None).unwrap();
        let err = client
            .verify_webhook_signature_at("{}", "t=1,v1=abc", 1)
            .unwrap_err();
        assert!(matches!(err, StripeError::Configuration(_)));
    }
}
