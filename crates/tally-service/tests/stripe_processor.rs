//! Stripe off-session charges against a mock Stripe API.

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tally_core::{AccountId, PaymentMethod};
use tally_service::{ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor, StripeClient};

fn charge_request(idempotency_key: &str) -> ChargeRequest {
    ChargeRequest {
        account_id: AccountId::generate(),
        payment_method: PaymentMethod {
            payment_method_ref: "pm_card_visa".into(),
            customer_ref: Some("cus_test".into()),
        },
        amount: dec!(20),
        idempotency_key: idempotency_key.into(),
    }
}

fn client(server: &MockServer) -> StripeClient {
    StripeClient::new("sk_test_123", None)
        .unwrap()
        .with_base_url(server.uri())
}

fn intent(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "amount": 2000,
        "currency": "usd",
        "status": status,
        "customer": "cus_test",
        "metadata": { "kind": "auto_top_up" }
    })
}

#[tokio::test]
async fn charge_sends_idempotency_key_and_off_session_params() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(header("Idempotency-Key", "topup-key-7"))
        .and(body_string_contains("amount=2000"))
        .and(body_string_contains("off_session=true"))
        .and(body_string_contains("customer=cus_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent("pi_123", "succeeded")))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server)
        .charge(&charge_request("topup-key-7"))
        .await
        .unwrap();

    assert_eq!(outcome.confirmation_ref, "pi_123");
    assert_eq!(outcome.status, ChargeStatus::Succeeded);
}

#[tokio::test]
async fn processing_intent_is_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent("pi_456", "processing")))
        .mount(&server)
        .await;

    let outcome = client(&server).charge(&charge_request("k")).await.unwrap();
    assert_eq!(outcome.status, ChargeStatus::Pending);
}

#[tokio::test]
async fn intent_needing_action_is_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent("pi_789", "requires_action")),
        )
        .mount(&server)
        .await;

    let outcome = client(&server).charge(&charge_request("k")).await.unwrap();
    assert_eq!(outcome.status, ChargeStatus::Failed);
    assert_eq!(outcome.confirmation_ref, "pi_789");
}

#[tokio::test]
async fn card_error_is_declined() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .charge(&charge_request("k"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Declined(ref m) if m.contains("declined")));
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server)
        .charge(&charge_request("k"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Unavailable(_)));
}

#[tokio::test]
async fn sub_cent_amount_is_rejected_before_calling_stripe() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent("pi_x", "succeeded")))
        .expect(0)
        .mount(&server)
        .await;

    let mut request = charge_request("k");
    request.amount = dec!(10.005);
    let err = client(&server).charge(&request).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));
}
