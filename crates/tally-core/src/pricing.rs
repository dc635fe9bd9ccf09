//! Pricing configuration for tally.
//!
//! Models are priced per million tokens, separately for input and output.
//! The table is versioned: a new table gets a higher version, and every usage
//! record remembers the version it was priced with.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BillingError, Result};
use crate::money::round_credits;

const TOKENS_PER_UNIT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn usd(mantissa: i64, scale: u32) -> Decimal {
    Decimal::new(mantissa, scale)
}

/// Per-model price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTable {
    /// Monotonic table version.
    pub version: u32,

    /// Model whose prices apply to models missing from the table.
    pub default_model: String,

    /// Output tokens assumed when estimating a cost before the operation runs.
    pub estimate_output_tokens: u64,

    /// Prices by model name.
    pub models: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();

        // OpenAI models
        models.insert(
            "gpt-4o".to_string(),
            ModelPricing::per_million(usd(250, 2), usd(1000, 2)),
        );
        models.insert(
            "gpt-4o-mini".to_string(),
            ModelPricing::per_million(usd(15, 2), usd(60, 2)),
        );
        models.insert(
            "gpt-4-turbo".to_string(),
            ModelPricing::per_million(usd(10, 0), usd(30, 0)),
        );

        // Anthropic models
        models.insert(
            "claude-3-5-sonnet".to_string(),
            ModelPricing::per_million(usd(3, 0), usd(15, 0)),
        );
        models.insert(
            "claude-3-haiku".to_string(),
            ModelPricing::per_million(usd(25, 2), usd(125, 2)),
        );

        // Google models
        models.insert(
            "gemini-1.5-pro".to_string(),
            ModelPricing::per_million(usd(125, 2), usd(5, 0)),
        );
        models.insert(
            "gemini-1.5-flash".to_string(),
            ModelPricing::per_million(usd(75, 3), usd(30, 2)),
        );

        Self {
            version: 1,
            default_model: "gpt-4o".to_string(),
            estimate_output_tokens: 4096,
            models,
        }
    }
}

impl PricingTable {
    /// Check that the table can price any model.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Configuration` if the default model is missing or
    /// any price is negative.
    pub fn validate(&self) -> Result<()> {
        if !self.models.contains_key(&self.default_model) {
            return Err(BillingError::Configuration(format!(
                "default model {} is not in the pricing table",
                self.default_model
            )));
        }
        if let Some((model, _)) = self
            .models
            .iter()
            .find(|(_, p)| {
                p.input_per_million.is_sign_negative() || p.output_per_million.is_sign_negative()
            })
        {
            return Err(BillingError::Configuration(format!(
                "negative price for model {model}"
            )));
        }
        Ok(())
    }

    /// Prices for a model, falling back to the default model.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Configuration` if neither the model nor the
    /// default model is priced.
    pub fn pricing_for(&self, model: &str) -> Result<&ModelPricing> {
        self.models
            .get(model)
            .or_else(|| self.models.get(&self.default_model))
            .ok_or_else(|| {
                BillingError::Configuration(format!(
                    "no pricing for {model} and default model {} is missing",
                    self.default_model
                ))
            })
    }

    /// Whether a model has its own entry.
    #[must_use]
    pub fn is_known(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Cost of a finished operation.
    ///
    /// The input side is always charged; zero output tokens only zero the
    /// output side.
    ///
    /// # Errors
    ///
    /// See [`PricingTable::pricing_for`].
    pub fn actual_cost(&self, model: &str, tokens_in: u64, tokens_out: u64) -> Result<Decimal> {
        let pricing = self.pricing_for(model)?;
        Ok(pricing.cost(tokens_in, tokens_out))
    }

    /// Pessimistic cost estimate from the prompt size alone.
    ///
    /// # Errors
    ///
    /// See [`PricingTable::pricing_for`].
    pub fn estimate_cost(&self, model: &str, prompt_tokens: u64) -> Result<Decimal> {
        let pricing = self.pricing_for(model)?;
        Ok(pricing.cost(prompt_tokens, self.estimate_output_tokens))
    }
}

/// Pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Credits per 1 million input tokens.
    pub input_per_million: Decimal,
    /// Credits per 1 million output tokens.
    pub output_per_million: Decimal,
}

impl ModelPricing {
    /// Build from dollar prices per million tokens.
    #[must_use]
    pub const fn per_million(input: Decimal, output: Decimal) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
        }
    }

    /// Cost of the given token counts, rounded to ledger precision.
    #[must_use]
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> Decimal {
        let input = Decimal::from(tokens_in) * self.input_per_million / TOKENS_PER_UNIT;
        let output = Decimal::from(tokens_out) * self.output_per_million / TOKENS_PER_UNIT;
        round_credits((input + output).max(Decimal::ZERO))
    }
}
