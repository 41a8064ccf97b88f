//! Route assembly

pub mod billing;
pub mod profiles;

use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the application router.
///
/// Webhook and checkout endpoints stay outside the auth layer: checkout is
/// reachable pre-signup and webhook callers authenticate by signature, not
/// by session.
pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/change-plan", post(billing::change_plan))
        .route("/cancel-plan", delete(billing::cancel_plan))
        .route("/subscription-status", get(billing::subscription_status))
        .route("/create-profile", post(profiles::create_profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/checkout", post(billing::create_checkout))
        .route("/webhook/register", post(billing::stripe_webhook))
        .route("/check-subscription", get(billing::check_subscription))
        .route("/internal/invariants", get(billing::invariants_report))
        .merge(authenticated)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
