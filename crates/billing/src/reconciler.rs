//! Subscription reconciler
//!
//! The state machine that moves a profile between `free/inactive` and
//! `active(tier)` in response to user actions and billing-processor events.
//! The processor is authoritative; local state converges on the next
//! observed event rather than by polling. Concurrent transitions on one
//! profile resolve last-write-wins, scoped to single-record updates.

use std::sync::Arc;

use platewise_shared::PlanKey;

use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::profiles::{Profile, ProfileStore, ProfileUpdate};

/// Applies subscription-state transitions against the profile store and the
/// billing gateway. Adapters are injected at construction; the process entry
/// point owns their lifecycle.
pub struct SubscriptionReconciler {
    store: Arc<dyn ProfileStore>,
    gateway: Arc<dyn BillingGateway>,
}

impl SubscriptionReconciler {
    pub fn new(store: Arc<dyn ProfileStore>, gateway: Arc<dyn BillingGateway>) -> Self {
        Self { store, gateway }
    }

    /// Start a checkout for the requested plan and return the hosted
    /// session URL. The plan key is validated before any gateway call is
    /// made.
    pub async fn create_checkout(
        &self,
        plan_type: &str,
        user_id: &str,
        email: &str,
    ) -> BillingResult<String> {
        let plan = PlanKey::parse(plan_type)
            .ok_or_else(|| BillingError::InvalidPlan(plan_type.to_string()))?;

        self.gateway
            .create_checkout_session(plan, user_id, email)
            .await
    }

    /// Checkout completed: activate the profile on the purchased plan.
    ///
    /// Uses the upsert primitive because the profile normally exists already
    /// but webhook delivery may race its creation. Replays converge on the
    /// same final state.
    pub async fn apply_checkout_completed(
        &self,
        user_id: &str,
        email: Option<&str>,
        plan: PlanKey,
        subscription_id: &str,
    ) -> BillingResult<Profile> {
        let profile = self
            .store
            .upsert(
                user_id,
                email.unwrap_or(""),
                ProfileUpdate::activate(plan.tier(), subscription_id),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            subscription_id = %subscription_id,
            "Subscription activated from checkout"
        );

        Ok(profile)
    }

    /// User-initiated plan change.
    ///
    /// The billing-side price swap is deferred to the period end; the local
    /// tier is set to the new plan immediately so the user sees their
    /// selection right away. Until the period rolls over, local tier and
    /// billed price intentionally disagree.
    pub async fn change_plan(&self, user_id: &str, new_plan: PlanKey) -> BillingResult<Profile> {
        let profile = self
            .store
            .find(user_id)
            .await?
            .ok_or_else(|| BillingError::ProfileNotFound(user_id.to_string()))?;

        let subscription_id = profile
            .stripe_subscription_id
            .as_deref()
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        self.gateway
            .update_subscription_price(subscription_id, new_plan, true)
            .await?;

        let updated = self
            .store
            .update_by_user_id(user_id, ProfileUpdate::tier(new_plan.tier()))
            .await?;

        tracing::info!(
            user_id = %user_id,
            from_tier = %profile.subscription_tier,
            to_tier = %updated.subscription_tier,
            "Plan change applied (billing-side change deferred to period end)"
        );

        Ok(updated)
    }

    /// User-initiated cancellation.
    ///
    /// Every lookup stage short-circuits with `SubscriptionNotFound` before
    /// any mutation; the profile is only touched after the processor-side
    /// cancel succeeds.
    pub async fn cancel(&self, user_id: &str) -> BillingResult<Profile> {
        let profile = self
            .store
            .find(user_id)
            .await?
            .ok_or_else(|| BillingError::ProfileNotFound(user_id.to_string()))?;

        let subscription_id = profile
            .stripe_subscription_id
            .as_deref()
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        // Confirm the subscription still exists at the processor.
        self.gateway.retrieve_subscription(subscription_id).await?;

        self.gateway.cancel_subscription(subscription_id).await?;

        let updated = self
            .store
            .update_by_user_id(user_id, ProfileUpdate::deactivate())
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            "Subscription cancelled, profile deactivated"
        );

        Ok(updated)
    }

    /// Webhook-triggered deactivation (payment failed, subscription
    /// deleted). Bulk-idempotent: an unresolvable subscription id touches
    /// zero rows and is logged, never raised: delivery is at-least-once and
    /// may arrive after the profile was already deactivated or never
    /// existed.
    pub async fn deactivate_by_subscription(
        &self,
        subscription_id: &str,
        reason: &str,
    ) -> BillingResult<u64> {
        let rows = self
            .store
            .update_all_matching_subscription_id(subscription_id, ProfileUpdate::deactivate())
            .await?;

        if rows == 0 {
            tracing::warn!(
                subscription_id = %subscription_id,
                reason = %reason,
                "Deactivation event matched no profile - ignoring"
            );
        } else {
            tracing::info!(
                subscription_id = %subscription_id,
                reason = %reason,
                profiles = rows,
                "Profile deactivated from billing event"
            );
        }

        Ok(rows)
    }

    /// Read path backing the subscription-status endpoints.
    pub async fn subscription_state(&self, user_id: &str) -> BillingResult<Option<Profile>> {
        self.store.find(user_id).await
    }
}
