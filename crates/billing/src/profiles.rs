//! Profile store
//!
//! One profile per authenticated user, keyed by the identity provider's user
//! id. The profile is the local record of subscription state; the billing
//! processor remains the source of truth and is reconciled through the
//! transitions in [`crate::reconciler`].

use async_trait::async_trait;
use platewise_shared::SubscriptionTier;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Local record of a user's subscription state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Identity-provider user id. Immutable once created.
    pub user_id: String,
    /// Best-effort contact address; may be empty if unavailable at creation.
    pub email: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_active: bool,
    /// External subscription id. `None` means no active subscription; the
    /// empty string is never stored.
    pub stripe_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Partial change-set applied to a profile.
///
/// `stripe_subscription_id` is doubly optional so that clearing the id
/// (`Some(None)`) and leaving it untouched (`None`) stay distinct.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub subscription_tier: Option<SubscriptionTier>,
    pub subscription_active: Option<bool>,
    pub stripe_subscription_id: Option<Option<String>>,
}

impl ProfileUpdate {
    /// Change-set for a completed checkout: paid tier, active, linked to the
    /// new billing subscription.
    pub fn activate(tier: SubscriptionTier, subscription_id: &str) -> Self {
        Self {
            subscription_tier: Some(tier),
            subscription_active: Some(true),
            stripe_subscription_id: Some(Some(subscription_id.to_string())),
            ..Default::default()
        }
    }

    /// Change-set for every deactivating transition: back to the free tier
    /// with the subscription id cleared.
    pub fn deactivate() -> Self {
        Self {
            subscription_tier: Some(SubscriptionTier::Free),
            subscription_active: Some(false),
            stripe_subscription_id: Some(None),
            ..Default::default()
        }
    }

    /// Change-set that only moves the tier.
    pub fn tier(tier: SubscriptionTier) -> Self {
        Self {
            subscription_tier: Some(tier),
            ..Default::default()
        }
    }
}

/// Persistence contract for profiles.
///
/// Webhook-triggered transitions use the bulk primitive so that a missing
/// profile is a no-op rather than an error; user-initiated transitions use
/// the single-record primitives and surface `ProfileNotFound`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find(&self, user_id: &str) -> BillingResult<Option<Profile>>;

    /// Secondary lookup for webhook events that carry only the subscription
    /// id.
    async fn find_by_subscription_id(&self, subscription_id: &str)
        -> BillingResult<Option<Profile>>;

    /// Create a new free/inactive profile. Fails with `AlreadyExists` if a
    /// profile for `user_id` is already present.
    async fn create(&self, user_id: &str, email: &str) -> BillingResult<Profile>;

    /// Create-or-update. Tolerates the missing-profile case so checkout
    /// completion can race profile creation.
    async fn upsert(&self, user_id: &str, email: &str, update: ProfileUpdate)
        -> BillingResult<Profile>;

    /// Partial update of a single profile. Re-applying identical values is a
    /// no-op. Fails with `ProfileNotFound` if absent.
    async fn update_by_user_id(&self, user_id: &str, update: ProfileUpdate)
        -> BillingResult<Profile>;

    /// Update every profile referencing `subscription_id` (at most one, by
    /// schema). Returns the number of rows touched; zero is not an error.
    async fn update_all_matching_subscription_id(
        &self,
        subscription_id: &str,
        update: ProfileUpdate,
    ) -> BillingResult<u64>;
}

/// Postgres-backed profile store.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PROFILE_COLUMNS: &str = "user_id, email, subscription_tier, subscription_active, \
     stripe_subscription_id, created_at, updated_at";

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find(&self, user_id: &str) -> BillingResult<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE stripe_subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn create(&self, user_id: &str, email: &str) -> BillingResult<Profile> {
        // ON CONFLICT DO NOTHING keeps the existence check and the insert in
        // one statement; no row back means the profile already existed.
        let created = sqlx::query_as::<_, Profile>(&format!(
            r#"
            INSERT INTO profiles (user_id, email)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        created.ok_or_else(|| BillingError::AlreadyExists(user_id.to_string()))
    }

    async fn upsert(
        &self,
        user_id: &str,
        email: &str,
        update: ProfileUpdate,
    ) -> BillingResult<Profile> {
        let set_subscription_id = update.stripe_subscription_id.is_some();
        let subscription_id = update.stripe_subscription_id.clone().flatten();

        let profile = sqlx::query_as::<_, Profile>(&format!(
            r#"
            INSERT INTO profiles
                (user_id, email, subscription_tier, subscription_active, stripe_subscription_id)
            VALUES ($1, $2, COALESCE($3, 'free'), COALESCE($4, FALSE), $5)
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE($6, profiles.email),
                subscription_tier = COALESCE($3, profiles.subscription_tier),
                subscription_active = COALESCE($4, profiles.subscription_active),
                stripe_subscription_id = CASE WHEN $7 THEN $5
                                              ELSE profiles.stripe_subscription_id END,
                updated_at = NOW()
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(email)
        .bind(update.subscription_tier)
        .bind(update.subscription_active)
        .bind(&subscription_id)
        .bind(&update.email)
        .bind(set_subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn update_by_user_id(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> BillingResult<Profile> {
        let set_subscription_id = update.stripe_subscription_id.is_some();
        let subscription_id = update.stripe_subscription_id.clone().flatten();

        let updated = sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles SET
                email = COALESCE($2, email),
                subscription_tier = COALESCE($3, subscription_tier),
                subscription_active = COALESCE($4, subscription_active),
                stripe_subscription_id = CASE WHEN $5 THEN $6
                                              ELSE stripe_subscription_id END,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&update.email)
        .bind(update.subscription_tier)
        .bind(update.subscription_active)
        .bind(set_subscription_id)
        .bind(&subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| BillingError::ProfileNotFound(user_id.to_string()))
    }

    async fn update_all_matching_subscription_id(
        &self,
        subscription_id: &str,
        update: ProfileUpdate,
    ) -> BillingResult<u64> {
        let set_subscription_id = update.stripe_subscription_id.is_some();
        let new_subscription_id = update.stripe_subscription_id.clone().flatten();

        let rows = sqlx::query(
            r#"
            UPDATE profiles SET
                email = COALESCE($2, email),
                subscription_tier = COALESCE($3, subscription_tier),
                subscription_active = COALESCE($4, subscription_active),
                stripe_subscription_id = CASE WHEN $5 THEN $6
                                              ELSE stripe_subscription_id END,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(&update.email)
        .bind(update.subscription_tier)
        .bind(update.subscription_active)
        .bind(set_subscription_id)
        .bind(&new_subscription_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}
