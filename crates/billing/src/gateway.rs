//! Billing gateway
//!
//! Wraps the payment processor behind a trait so the reconciler can be
//! exercised against an in-memory implementation. The production
//! implementation is [`StripeGateway`] over async-stripe.

use std::collections::HashMap;

use async_trait::async_trait;
use platewise_shared::PlanKey;
use stripe::{
    CancelSubscription, CheckoutSession, CheckoutSessionMode, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, Subscription, SubscriptionId, UpdateSubscription,
    UpdateSubscriptionItems,
};
// The proration behavior enum lives in the subscription module (not subscription_item)
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Mirror of the processor's subscription object. Observed through
/// request/response or webhook payloads only; never owned locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSubscription {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: bool,
    /// Price bound to the first (and only) line item.
    pub price_id: Option<String>,
}

/// Contract for the external payment processor.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Create a hosted checkout session for the given plan and return its
    /// URL. The user id and plan key are embedded as session metadata so the
    /// asynchronous completion event can be correlated back without a
    /// database round trip.
    async fn create_checkout_session(
        &self,
        plan: PlanKey,
        user_id: &str,
        email: &str,
    ) -> BillingResult<String>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<BillingSubscription>;

    /// Cancel the subscription at the processor. Fails with
    /// `SubscriptionNotFound` if it is already cancelled or absent.
    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;

    /// Swap the price on the subscription's single line item. With
    /// `deferred` set, no proration charge is created and the new price
    /// takes effect from the next billing period.
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        plan: PlanKey,
        deferred: bool,
    ) -> BillingResult<BillingSubscription>;

    fn price_id_for_plan(&self, plan: PlanKey) -> String;
}

/// Production gateway over the Stripe API.
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_subscription_id(&self, subscription_id: &str) -> BillingResult<SubscriptionId> {
        subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
    }

    fn mirror(subscription: &Subscription) -> BillingSubscription {
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string());

        BillingSubscription {
            id: subscription.id.to_string(),
            status: subscription.status.to_string(),
            cancel_at_period_end: subscription.cancel_at_period_end,
            price_id,
        }
    }

    /// Stripe reports a missing subscription as a `resource_missing` API
    /// error rather than a distinct error type.
    fn classify(subscription_id: &str, e: stripe::StripeError) -> BillingError {
        let err_str = e.to_string();
        if err_str.contains("resource_missing") || err_str.contains("No such subscription") {
            BillingError::SubscriptionNotFound(subscription_id.to_string())
        } else {
            BillingError::StripeApi(err_str)
        }
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        plan: PlanKey,
        user_id: &str,
        email: &str,
    ) -> BillingResult<String> {
        let config = self.stripe.config();
        let price_id = config.price_id_for_plan(plan).to_string();

        let success_url = format!("{}/account?checkout=success", config.app_base_url);
        let cancel_url = format!("{}/pricing?checkout=cancelled", config.app_base_url);

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("plan".to_string(), plan.as_str().to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.client_reference_id = Some(user_id);
        if !email.is_empty() {
            params.customer_email = Some(email);
        }
        params.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(url)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<BillingSubscription> {
        let sub_id = self.parse_subscription_id(subscription_id)?;

        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[])
            .await
            .map_err(|e| Self::classify(subscription_id, e))?;

        Ok(Self::mirror(&subscription))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let sub_id = self.parse_subscription_id(subscription_id)?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        Subscription::cancel(self.stripe.inner(), &sub_id, params)
            .await
            .map_err(|e| Self::classify(subscription_id, e))?;

        tracing::info!(subscription_id = %subscription_id, "Cancelled subscription");

        Ok(())
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        plan: PlanKey,
        deferred: bool,
    ) -> BillingResult<BillingSubscription> {
        let sub_id = self.parse_subscription_id(subscription_id)?;
        let price_id = self.stripe.config().price_id_for_plan(plan).to_string();

        // The item id is required to swap the price in place.
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[])
            .await
            .map_err(|e| Self::classify(subscription_id, e))?;

        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Internal("No subscription items found".to_string()))?;

        let mut metadata = HashMap::new();
        metadata.insert("plan".to_string(), plan.as_str().to_string());

        // Deferred change-over: no proration invoice now, the new price
        // bills from the next period. Immediate changes charge the prorated
        // difference right away.
        let proration = if deferred {
            SubscriptionProrationBehavior::None
        } else {
            SubscriptionProrationBehavior::CreateProrations
        };

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            proration_behavior: Some(proration),
            ..Default::default()
        };

        let subscription = Subscription::update(self.stripe.inner(), &sub_id, params)
            .await
            .map_err(|e| Self::classify(subscription_id, e))?;

        tracing::info!(
            subscription_id = %subscription_id,
            plan = %plan,
            deferred = deferred,
            "Updated subscription price"
        );

        Ok(Self::mirror(&subscription))
    }

    fn price_id_for_plan(&self, plan: PlanKey) -> String {
        self.stripe.config().price_id_for_plan(plan).to_string()
    }
}
