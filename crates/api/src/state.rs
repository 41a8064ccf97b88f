//! Application state

use std::sync::Arc;

use platewise_billing::BillingService;
use sqlx::PgPool;

use crate::auth::ClerkVerifier;
use crate::config::Config;

/// Shared application state
///
/// Owns the adapter instances (billing gateway, identity verifier) for the
/// lifetime of the process; handlers only borrow them.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub verifier: ClerkVerifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let billing = BillingService::from_env(pool.clone())
            .map_err(|e| anyhow::anyhow!("Stripe billing not configured: {}", e))?;
        tracing::info!("Stripe billing service initialized");

        let verifier = ClerkVerifier::new(
            &config.clerk_jwt_public_key,
            config.clerk_issuer.as_deref(),
        )
        .map_err(|e| anyhow::anyhow!("Identity provider not configured: {}", e))?;
        tracing::info!("Clerk session verification enabled");

        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
            verifier,
        })
    }
}
