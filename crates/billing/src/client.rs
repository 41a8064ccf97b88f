//! Stripe client construction and price catalog configuration

use platewise_shared::PlanKey;

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for the three recurring plans.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub week: String,
    pub month: String,
    pub year: String,
}

/// Configuration for the Stripe integration.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Base URL the checkout success/cancel redirects are built from.
    pub app_base_url: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;
        let app_base_url = require_env("APP_BASE_URL")?;

        let price_ids = PriceIds {
            week: require_env("STRIPE_PRICE_WEEK")?,
            month: require_env("STRIPE_PRICE_MONTH")?,
            year: require_env("STRIPE_PRICE_YEAR")?,
        };

        Ok(Self {
            secret_key,
            webhook_secret,
            app_base_url,
            price_ids,
        })
    }

    /// Static plan-key to price-id mapping.
    pub fn price_id_for_plan(&self, plan: PlanKey) -> &str {
        match plan {
            PlanKey::Week => &self.price_ids.week,
            PlanKey::Month => &self.price_ids.month,
            PlanKey::Year => &self.price_ids.year,
        }
    }

    /// Reverse lookup from a Stripe price id to the plan it belongs to.
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<PlanKey> {
        if price_id == self.price_ids.week {
            Some(PlanKey::Week)
        } else if price_id == self.price_ids.month {
            Some(PlanKey::Month)
        } else if price_id == self.price_ids.year {
            Some(PlanKey::Year)
        } else {
            None
        }
    }
}

fn require_env(key: &str) -> BillingResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BillingError::Config(format!("{} not configured", key)))
}

/// Wrapper over the async-stripe client carrying the price catalog.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Access the underlying async-stripe client.
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: "whsec_test".into(),
            app_base_url: "https://app.platewise.test".into(),
            price_ids: PriceIds {
                week: "price_week_1".into(),
                month: "price_month_1".into(),
                year: "price_year_1".into(),
            },
        }
    }

    #[test]
    fn price_ids_are_distinct_per_plan() {
        let config = test_config();
        let week = config.price_id_for_plan(PlanKey::Week);
        let month = config.price_id_for_plan(PlanKey::Month);
        let year = config.price_id_for_plan(PlanKey::Year);

        assert!(!week.is_empty() && !month.is_empty() && !year.is_empty());
        assert_ne!(week, month);
        assert_ne!(month, year);
        assert_ne!(week, year);
    }

    #[test]
    fn plan_for_price_id_round_trips() {
        let config = test_config();
        for plan in [PlanKey::Week, PlanKey::Month, PlanKey::Year] {
            let price = config.price_id_for_plan(plan);
            assert_eq!(config.plan_for_price_id(price), Some(plan));
        }
        assert_eq!(config.plan_for_price_id("price_unknown"), None);
    }
}
