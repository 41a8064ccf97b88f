// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Platewise Billing Module
//!
//! The subscription lifecycle core: reconciles local profile state with the
//! payment processor across checkout completion, plan changes, cancellation,
//! and asynchronous billing events.
//!
//! ## Features
//!
//! - **Profiles**: one per user, the local record of subscription state
//! - **Checkout**: hosted session creation with metadata correlation
//! - **Reconciler**: the state machine applying lifecycle transitions
//! - **Webhooks**: signature verification, event dispatch, replay ledger
//! - **Invariants**: runnable consistency checks over the profile schema

pub mod client;
pub mod error;
pub mod gateway;
pub mod invariants;
pub mod profiles;
pub mod reconciler;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod mocks;


// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{BillingGateway, BillingSubscription, StripeGateway};

// Profiles
pub use profiles::{PgProfileStore, Profile, ProfileStore, ProfileUpdate};

// Reconciler
pub use reconciler::SubscriptionReconciler;

// Webhooks
pub use webhooks::{WebhookEvent, WebhookHandler, WebhookLedger};

// Invariants
pub use invariants::{InvariantCheckSummary, InvariantChecker, InvariantViolation};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub profiles: Arc<dyn ProfileStore>,
    pub reconciler: Arc<SubscriptionReconciler>,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }

    /// Create a new billing service with an explicit Stripe client
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let webhook_secret = stripe.config().webhook_secret.clone();

        let store: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(pool.clone()));
        let gateway: Arc<dyn BillingGateway> = Arc::new(StripeGateway::new(stripe));
        let reconciler = Arc::new(SubscriptionReconciler::new(store.clone(), gateway));

        let ledger = WebhookLedger::new(pool.clone());
        let webhooks = WebhookHandler::new(webhook_secret, reconciler.clone(), Some(ledger));

        Self {
            profiles: store,
            reconciler,
            webhooks,
            invariants: InvariantChecker::new(pool),
        }
    }
}
