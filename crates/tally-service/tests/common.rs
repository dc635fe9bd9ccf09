//! Common test utilities for tally integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use tally_core::{AccountId, ModelPricing, PricingTable};
use tally_service::auth::JwtClaims;
use tally_service::crypto::hmac_sha256_hex;
use tally_service::{
    create_router, AppState, ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError,
    PaymentProcessor, ServiceConfig, StripeClient,
};
use tally_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const MODEL: &str = "test-model";

/// Processor that succeeds once per idempotency key, like Stripe.
#[derive(Default)]
pub struct FakeProcessor {
    pub calls: AtomicUsize,
    keys: Mutex<HashMap<String, String>>,
}

impl FakeProcessor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut keys = self.keys.lock().unwrap();
        let next = keys.len();
        let confirmation_ref = keys
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| format!("pi_fake_{next}"))
            .clone();
        Ok(ChargeOutcome {
            confirmation_ref,
            status: ChargeStatus::Succeeded,
        })
    }
}

/// $1 per million tokens in and out; estimates assume no output.
pub fn flat_pricing() -> PricingTable {
    PricingTable {
        version: 1,
        default_model: MODEL.into(),
        estimate_output_tokens: 0,
        models: HashMap::from([(
            MODEL.to_string(),
            ModelPricing::per_million(Decimal::ONE, Decimal::ONE),
        )]),
    }
}

/// Configuration used by every harness, with bonuses turned off.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        jwt_secret: Some(JWT_SECRET.into()),
        service_api_key: Some(SERVICE_API_KEY.into()),
        admin_api_key: Some(ADMIN_API_KEY.into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        pricing: flat_pricing(),
        welcome_bonus: Decimal::ZERO,
        referral_bonus: Decimal::ZERO,
        reconcile_interval_seconds: 0,
        ..ServiceConfig::default()
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// The auto-top-up processor.
    pub processor: Arc<FakeProcessor>,
    /// The default caller.
    pub account_id: AccountId,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(FakeProcessor::default());
        // Never reached: checkout calls are not made in these tests.
        let stripe = StripeClient::new("sk_test_unused", config.stripe_webhook_secret.clone())
            .expect("Failed to create Stripe client")
            .with_base_url("http://127.0.0.1:9");

        let state = AppState::with_processor(
            store.clone(),
            config,
            Some(processor.clone() as Arc<dyn PaymentProcessor>),
            Some(Arc::new(stripe)),
        )
        .expect("Failed to build state");

        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        Self {
            server,
            store,
            processor,
            account_id: AccountId::generate(),
        }
    }

    /// Bearer header for the default caller.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(&self.account_id)
    }

    /// Bearer header carrying an HS256 token for `account_id`.
    pub fn auth_header_for(account_id: &AccountId) -> String {
        let claims = JwtClaims {
            sub: account_id.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: Some(chrono::Utc::now().timestamp()),
            iss: None,
            aud: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Register the default caller.
    pub async fn create_account(&self) -> Value {
        self.create_account_for(&self.account_id, json!({})).await
    }

    /// Register `account_id` with the given request body.
    pub async fn create_account_for(&self, account_id: &AccountId, body: Value) -> Value {
        let response = self
            .server
            .post("/v1/accounts")
            .add_header("authorization", Self::auth_header_for(account_id))
            .json(&body)
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Append an admin adjustment.
    pub async fn fund(&self, account_id: &AccountId, amount: &str) {
        self.server
            .post("/v1/admin/adjustments")
            .add_header("x-admin-key", ADMIN_API_KEY)
            .add_header("x-admin-id", "tests")
            .json(&json!({
                "account_id": account_id.to_string(),
                "kind": "adjustment",
                "amount": amount,
                "reason": "Test funding"
            }))
            .await
            .assert_status_ok();
    }

    /// Current balance as reported by the API.
    pub async fn balance(&self, account_id: &AccountId) -> Decimal {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", Self::auth_header_for(account_id))
            .await;
        response.assert_status_ok();
        decimal(&response.json::<Value>()["balance"])
    }

    /// Turn on auto-top-up with a payment method on file.
    pub async fn enable_auto_top_up(&self, account_id: &AccountId, threshold: &str, amount: &str) {
        let auth = Self::auth_header_for(account_id);
        self.server
            .put("/v1/accounts/me/payment-method")
            .add_header("authorization", auth.clone())
            .json(&json!({ "payment_method_ref": "pm_card_visa", "customer_ref": "cus_test" }))
            .await
            .assert_status_ok();
        self.server
            .put("/v1/accounts/me/auto-top-up")
            .add_header("authorization", auth)
            .json(&json!({ "enabled": true, "threshold": threshold, "amount": amount }))
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a decimal serialized as a JSON string or number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("not a decimal"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("not a decimal"),
        other => panic!("expected a decimal, got {other}"),
    }
}

/// A `stripe-signature` header value for `payload`, signed now.
pub fn stripe_signature(payload: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &format!("{timestamp}.{payload}"))
        .expect("Failed to sign payload");
    format!("t={timestamp},v1={sig}")
}
