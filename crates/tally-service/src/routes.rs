//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    accounts, admin, billing, credits, health, referrals, usage, webhooks,
};
use crate::state::AppState;

/// Maximum concurrent requests for the service-facing usage endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health`
///
/// ## Accounts (user JWT)
/// - `POST /v1/accounts` - Register, credit welcome bonus, redeem referral
/// - `GET /v1/accounts/me`
/// - `PUT /v1/accounts/me/auto-top-up`
/// - `PUT /v1/accounts/me/payment-method`
///
/// ## Credits, referrals, billing (user JWT)
/// - `GET /v1/credits/balance`
/// - `GET /v1/credits/transactions`
/// - `POST /v1/credits/purchase`
/// - `GET /v1/referrals/code`
/// - `POST /v1/referrals/redeem`
/// - `GET /v1/billing/periods/:year_month`
///
/// ## Usage (service API key)
/// - `POST /v1/usage/authorize`
/// - `POST /v1/usage/settle`
/// - `POST /v1/usage/fail`
///
/// ## Admin (admin API key)
/// - `POST /v1/admin/bonuses/welcome`
/// - `POST /v1/admin/adjustments`
/// - `POST /v1/admin/accounts/:account_id/reconcile`
/// - `PUT /v1/admin/pricing`
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe`
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/authorize", post(usage::authorize))
        .route("/settle", post(usage::settle))
        .route("/fail", post(usage::fail))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/bonuses/welcome", post(admin::grant_welcome_bonus))
        .route("/adjustments", post(admin::create_adjustment))
        .route("/accounts/:account_id/reconcile", post(admin::reconcile))
        .route("/pricing", put(admin::put_pricing));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        .route("/accounts/me/auto-top-up", put(accounts::configure_auto_top_up))
        .route("/accounts/me/payment-method", put(accounts::set_payment_method))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/purchase", post(credits::purchase_credits))
        // Referrals
        .route("/referrals/code", get(referrals::get_code))
        .route("/referrals/redeem", post(referrals::redeem))
        // Billing
        .route("/billing/periods/:year_month", get(billing::get_period))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Usage has its own, larger limit
        .nest("/usage", usage_routes);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_seconds)))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
