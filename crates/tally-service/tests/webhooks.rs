//! Stripe webhook integration tests.

mod common;

use axum::http::StatusCode;
use common::{decimal, stripe_signature, TestHarness, MODEL, SERVICE_API_KEY};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tally_core::AccountId;

fn checkout_completed(account_id: &AccountId, session_id: &str, payment_intent: &str) -> String {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "created": chrono::Utc::now().timestamp(),
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": 2500,
                "client_reference_id": account_id.to_string(),
                "payment_intent": payment_intent,
                "metadata": {
                    "account_id": account_id.to_string(),
                    "credits_amount": "25.00",
                    "kind": "purchase"
                }
            }
        }
    })
    .to_string()
}

fn intent_succeeded(account_id: &AccountId, intent_id: &str, kind: &str) -> String {
    json!({
        "id": format!("evt_{intent_id}"),
        "type": "payment_intent.succeeded",
        "created": chrono::Utc::now().timestamp(),
        "data": {
            "object": {
                "id": intent_id,
                "amount": 2000,
                "currency": "usd",
                "status": "succeeded",
                "metadata": {
                    "account_id": account_id.to_string(),
                    "credits_amount": "20.00",
                    "kind": kind
                }
            }
        }
    })
    .to_string()
}

async fn deliver(harness: &TestHarness, payload: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", stripe_signature(payload))
        .text(payload)
        .await
}

#[tokio::test]
async fn checkout_completion_credits_purchase_once() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let payload = checkout_completed(&harness.account_id, "cs_test_1", "pi_checkout_1");
    let response = deliver(&harness, &payload).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["received"], true);
    assert_eq!(harness.balance(&harness.account_id).await, dec!(25));

    // Stripe retries deliveries.
    deliver(&harness, &payload).await.assert_status_ok();
    assert_eq!(harness.balance(&harness.account_id).await, dec!(25));

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: Value = response.json();
    let entries = body["transactions"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "purchase");
    assert_eq!(entries[0]["related_payment_ref"], "pi_checkout_1");
}

#[tokio::test]
async fn webhook_for_synchronous_top_up_is_not_credited_twice() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness
        .enable_auto_top_up(&harness.account_id, "5", "20")
        .await;

    let response = harness
        .server
        .post("/v1/usage/authorize")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({
            "account_id": harness.account_id.to_string(),
            "model": MODEL,
            "prompt_tokens": 1_000
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let confirmation_ref = body["top_up"]["confirmation_ref"].as_str().unwrap().to_string();
    assert_eq!(decimal(&body["balance"]), dec!(20));

    let payload = intent_succeeded(&harness.account_id, &confirmation_ref, "auto_top_up");
    deliver(&harness, &payload).await.assert_status_ok();
    assert_eq!(harness.balance(&harness.account_id).await, dec!(20));
}

#[tokio::test]
async fn pending_auto_top_up_is_credited_by_webhook() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let payload = intent_succeeded(&harness.account_id, "pi_async_1", "auto_top_up");
    deliver(&harness, &payload).await.assert_status_ok();
    assert_eq!(harness.balance(&harness.account_id).await, dec!(20));

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: Value = response.json();
    assert_eq!(body["transactions"][0]["kind"], "auto_purchase");
}

#[tokio::test]
async fn checkout_intents_are_ignored() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let payload = intent_succeeded(&harness.account_id, "pi_checkout_2", "purchase");
    deliver(&harness, &payload).await.assert_status_ok();
    assert_eq!(harness.balance(&harness.account_id).await, dec!(0));
}

#[tokio::test]
async fn unsigned_or_forged_webhooks_are_rejected() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let payload = checkout_completed(&harness.account_id, "cs_forged", "pi_forged");

    harness
        .server
        .post("/webhooks/stripe")
        .text(&payload)
        .await
        .assert_status_bad_request();

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", "t=1700000000,v1=deadbeef")
        .text(&payload)
        .await
        .assert_status_bad_request();

    assert_eq!(harness.balance(&harness.account_id).await, dec!(0));
}

#[tokio::test]
async fn unknown_events_are_acknowledged() {
    let harness = TestHarness::new();
    let payload = json!({
        "id": "evt_other",
        "type": "customer.created",
        "created": 0,
        "data": { "object": { "id": "cus_1" } }
    })
    .to_string();

    let response = deliver(&harness, &payload).await;
    response.assert_status(StatusCode::OK);
}
