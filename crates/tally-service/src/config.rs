//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use tally_core::{BillingError, PricingTable};

/// Welcome bonus granted to every new account, in USD.
const DEFAULT_WELCOME_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Bonus credited to a referrer per redeemed code, in USD.
const DEFAULT_REFERRAL_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// HS256 secret for user bearer tokens. User routes reject every
    /// request when unset.
    pub jwt_secret: Option<String>,

    /// Expected JWT issuer, if any.
    pub auth_issuer: Option<String>,

    /// Expected JWT audience, if any.
    pub auth_audience: Option<String>,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL override.
    pub stripe_api_base: Option<String>,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Initial pricing table.
    pub pricing: PricingTable,

    /// Amount of the one-time welcome bonus.
    pub welcome_bonus: Decimal,

    /// Amount credited to a referrer.
    pub referral_bonus: Decimal,

    /// Append settlements that would overdraw instead of rejecting them.
    pub allow_settlement_overdraft: bool,

    /// Seconds between background reconciliation sweeps; 0 disables.
    pub reconcile_interval_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// Fails when a configured value is present but malformed, such as an
    /// unreadable pricing file or a non-numeric bonus amount.
    pub fn from_env() -> Result<Self, BillingError> {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        let pricing = match std::env::var("PRICING_FILE") {
            Ok(path) => load_pricing_file(&path)?,
            Err(_) => PricingTable::default(),
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tally".into()),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            auth_issuer: std::env::var("AUTH_ISSUER").ok(),
            auth_audience: std::env::var("AUTH_AUDIENCE").ok(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: std::env::var("STRIPE_API_BASE").ok(),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            pricing,
            welcome_bonus: decimal_var("WELCOME_BONUS", DEFAULT_WELCOME_BONUS)?,
            referral_bonus: decimal_var("REFERRAL_BONUS", DEFAULT_REFERRAL_BONUS)?,
            allow_settlement_overdraft: std::env::var("ALLOW_SETTLEMENT_OVERDRAFT")
                .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
            reconcile_interval_seconds: std::env::var("RECONCILE_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
        })
    }
}

fn decimal_var(name: &str, default: Decimal) -> Result<Decimal, BillingError> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = Decimal::from_str(raw.trim())
                .map_err(|e| BillingError::Configuration(format!("{name}: {e}")))?;
            if value.is_sign_negative() {
                return Err(BillingError::Configuration(format!(
                    "{name} must not be negative"
                )));
            }
            Ok(value)
        }
        Err(_) => Ok(default),
    }
}

/// Load and validate a pricing table from a JSON file.
pub fn load_pricing_file(path: &str) -> Result<PricingTable, BillingError> {
    let table: PricingTable = load_secrets_file(path)
        .map_err(|e| BillingError::Configuration(format!("pricing file {path}: {e}")))?;
    table.validate()?;
    tracing::info!(path = %path, version = table.version, "Loaded pricing table");
    Ok(table)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tally".into(),
            jwt_secret: None,
            auth_issuer: None,
            auth_audience: None,
            service_api_key: None,
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: None,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingTable::default(),
            welcome_bonus: DEFAULT_WELCOME_BONUS,
            referral_bonus: DEFAULT_REFERRAL_BONUS,
            allow_settlement_overdraft: false,
            reconcile_interval_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = ServiceConfig::default();
        assert_eq!(config.welcome_bonus, Decimal::from(5));
        assert!(config.pricing.validate().is_ok());
        assert!(!config.allow_settlement_overdraft);
    }

    #[test]
    fn pricing_file_is_loaded_and_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let table = serde_json::to_string(&PricingTable::default()).unwrap();
        file.write_all(table.as_bytes()).unwrap();

        let loaded = load_pricing_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded, PricingTable::default());
    }

    #[test]
    fn missing_pricing_file_is_a_configuration_error() {
        let err = load_pricing_file("/nonexistent/pricing.json").unwrap_err();
        assert!(matches!(err, BillingError::Configuration(_)));
    }
}
