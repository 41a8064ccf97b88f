//! In-memory store and gateway doubles for reconciler and webhook tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use platewise_shared::PlanKey;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, BillingSubscription};
use crate::profiles::{Profile, ProfileStore, ProfileUpdate};

/// HashMap-backed profile store mirroring the semantics of the Postgres
/// implementation, including the zero-rows-is-ok bulk update.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().unwrap().len()
    }

    /// Snapshot a profile for assertions.
    pub fn snapshot(&self, user_id: &str) -> Option<Profile> {
        self.profiles.lock().unwrap().get(user_id).cloned()
    }

    fn new_profile(user_id: &str, email: &str) -> Profile {
        let now = OffsetDateTime::now_utc();
        Profile {
            user_id: user_id.to_string(),
            email: email.to_string(),
            subscription_tier: Default::default(),
            subscription_active: false,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(profile: &mut Profile, update: &ProfileUpdate) {
        if let Some(email) = &update.email {
            profile.email = email.clone();
        }
        if let Some(tier) = update.subscription_tier {
            profile.subscription_tier = tier;
        }
        if let Some(active) = update.subscription_active {
            profile.subscription_active = active;
        }
        if let Some(subscription_id) = &update.stripe_subscription_id {
            profile.stripe_subscription_id = subscription_id.clone();
        }
        profile.updated_at = OffsetDateTime::now_utc();
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find(&self, user_id: &str) -> BillingResult<Option<Profile>> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.stripe_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn create(&self, user_id: &str, email: &str) -> BillingResult<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        if profiles.contains_key(user_id) {
            return Err(BillingError::AlreadyExists(user_id.to_string()));
        }
        let profile = Self::new_profile(user_id, email);
        profiles.insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }

    async fn upsert(
        &self,
        user_id: &str,
        email: &str,
        update: ProfileUpdate,
    ) -> BillingResult<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Self::new_profile(user_id, email));
        Self::apply(profile, &update);
        Ok(profile.clone())
    }

    async fn update_by_user_id(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> BillingResult<Profile> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| BillingError::ProfileNotFound(user_id.to_string()))?;
        Self::apply(profile, &update);
        Ok(profile.clone())
    }

    async fn update_all_matching_subscription_id(
        &self,
        subscription_id: &str,
        update: ProfileUpdate,
    ) -> BillingResult<u64> {
        let mut profiles = self.profiles.lock().unwrap();
        let mut rows = 0;
        for profile in profiles.values_mut() {
            if profile.stripe_subscription_id.as_deref() == Some(subscription_id) {
                Self::apply(profile, &update);
                rows += 1;
            }
        }
        Ok(rows)
    }
}

/// Gateway double recording every call so tests can assert on interactions.
#[derive(Default)]
pub struct MockBillingGateway {
    subscriptions: Mutex<HashMap<String, BillingSubscription>>,
    pub checkout_calls: Mutex<Vec<(PlanKey, String)>>,
    pub price_updates: Mutex<Vec<(String, PlanKey, bool)>>,
    pub cancel_calls: Mutex<Vec<String>>,
}

impl MockBillingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a live subscription, as if a checkout had completed earlier.
    pub fn with_subscription(self, subscription_id: &str, plan: PlanKey) -> Self {
        self.subscriptions.lock().unwrap().insert(
            subscription_id.to_string(),
            BillingSubscription {
                id: subscription_id.to_string(),
                status: "active".to_string(),
                cancel_at_period_end: false,
                price_id: Some(mock_price_id(plan)),
            },
        );
        self
    }

    pub fn checkout_call_count(&self) -> usize {
        self.checkout_calls.lock().unwrap().len()
    }
}

fn mock_price_id(plan: PlanKey) -> String {
    format!("price_{}_test", plan)
}

#[async_trait]
impl BillingGateway for MockBillingGateway {
    async fn create_checkout_session(
        &self,
        plan: PlanKey,
        user_id: &str,
        _email: &str,
    ) -> BillingResult<String> {
        self.checkout_calls
            .lock()
            .unwrap()
            .push((plan, user_id.to_string()));
        Ok(format!("https://checkout.test/c/{}/{}", plan, user_id))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<BillingSubscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        self.cancel_calls
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        self.subscriptions
            .lock()
            .unwrap()
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        plan: PlanKey,
        deferred: bool,
    ) -> BillingResult<BillingSubscription> {
        self.price_updates
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), plan, deferred));

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;
        subscription.price_id = Some(mock_price_id(plan));
        Ok(subscription.clone())
    }

    fn price_id_for_plan(&self, plan: PlanKey) -> String {
        mock_price_id(plan)
    }
}
