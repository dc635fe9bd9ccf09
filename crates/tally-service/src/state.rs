//! Application state.

use std::sync::Arc;

use tally_core::Result;
use tally_store::Store;

use crate::config::ServiceConfig;
use crate::ledger::{BonusConfig, Ledger, LedgerConfig, PolicyConfig};
use crate::payments::PaymentProcessor;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Ledger services.
    pub ledger: Ledger,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for checkout and webhooks (optional).
    pub stripe: Option<Arc<StripeClient>>,
}

impl AppState {
    /// Create the state, using Stripe as the auto-top-up processor when
    /// it is configured.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_webhook_secret.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    let client = match &config.stripe_api_base {
                        Some(base) => client.with_base_url(base),
                        None => client,
                    };
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - purchases and auto-top-up are unavailable");
        }

        let processor = stripe
            .clone()
            .map(|client| client as Arc<dyn PaymentProcessor>);
        Self::with_processor(store, config, processor, stripe)
    }

    /// Create the state with an explicit payment processor.
    pub fn with_processor(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        processor: Option<Arc<dyn PaymentProcessor>>,
        stripe: Option<Arc<StripeClient>>,
    ) -> Result<Self> {
        let ledger = Ledger::new(
            Arc::clone(&store),
            processor,
            LedgerConfig {
                pricing: config.pricing.clone(),
                policy: PolicyConfig {
                    allow_settlement_overdraft: config.allow_settlement_overdraft,
                    ..PolicyConfig::default()
                },
                bonus: BonusConfig {
                    welcome_amount: config.welcome_bonus,
                    referral_amount: config.referral_bonus,
                },
            },
        )?;

        Ok(Self {
            store,
            ledger,
            config,
            stripe,
        })
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }
}
