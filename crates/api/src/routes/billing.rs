//! Billing routes for subscription lifecycle and Stripe webhooks

use axum::{
    extract::{Extension, Query, State},
    http::HeaderMap,
    Json,
};
use platewise_billing::Profile;
use platewise_shared::{PlanKey, SubscriptionTier};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan_type: String,
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Request to change the subscription plan
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    pub new_plan: String,
}

/// Response for plan change and cancellation
#[derive(Debug, Serialize)]
pub struct SubscriptionChangeResponse {
    pub message: String,
    pub subscription: Profile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscriptionQuery {
    pub user_id: String,
}

/// Subscription summary consumed by the routing middleware
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub tier: SubscriptionTier,
    pub stripe_subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSubscriptionResponse {
    pub is_subscribed: bool,
    pub subscription: SubscriptionSummary,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub subscription: Option<Profile>,
}

/// Create a hosted checkout session for one of the recurring plans.
///
/// Unauthenticated by design: the pricing page drives this before a session
/// exists. The user id travels into the session metadata and comes back on
/// the completion event.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let url = state
        .billing
        .reconciler
        .create_checkout(&req.plan_type, &req.user_id, &req.email)
        .await?;

    Ok(Json(CheckoutResponse { url }))
}

/// Receive billing events from Stripe.
///
/// Signature failures reject the request so Stripe redelivers; everything
/// else is acknowledged with `{"received": true}`, including events whose
/// effect was dropped for a permanent data-shape problem.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::SignatureInvalid)?;

    // Verification runs on the raw body exactly as received.
    let event = state.billing.webhooks.verify_event(&body, signature)?;
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}

/// Switch the caller's subscription to a different plan.
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<Json<SubscriptionChangeResponse>, ApiError> {
    let plan = PlanKey::parse(&req.new_plan)
        .ok_or_else(|| ApiError::InvalidPlan(format!("Invalid plan '{}'", req.new_plan)))?;

    let profile = state
        .billing
        .reconciler
        .change_plan(&auth_user.user_id, plan)
        .await?;

    Ok(Json(SubscriptionChangeResponse {
        message: format!(
            "Plan changed to {}; billing updates at the end of the current period",
            profile.subscription_tier
        ),
        subscription: profile,
    }))
}

/// Cancel the caller's subscription immediately.
pub async fn cancel_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionChangeResponse>, ApiError> {
    let profile = state.billing.reconciler.cancel(&auth_user.user_id).await?;

    Ok(Json(SubscriptionChangeResponse {
        message: "Subscription cancelled".to_string(),
        subscription: profile,
    }))
}

/// Public subscription check used by the routing middleware.
pub async fn check_subscription(
    State(state): State<AppState>,
    Query(query): Query<CheckSubscriptionQuery>,
) -> Result<Json<CheckSubscriptionResponse>, ApiError> {
    let profile = state
        .billing
        .reconciler
        .subscription_state(&query.user_id)
        .await?;

    let response = match profile {
        Some(profile) => CheckSubscriptionResponse {
            is_subscribed: profile.subscription_active,
            subscription: SubscriptionSummary {
                tier: profile.subscription_tier,
                stripe_subscription_id: profile.stripe_subscription_id,
            },
        },
        None => CheckSubscriptionResponse {
            is_subscribed: false,
            subscription: SubscriptionSummary {
                tier: SubscriptionTier::Free,
                stripe_subscription_id: None,
            },
        },
    };

    Ok(Json(response))
}

/// Full subscription state for the authenticated caller.
pub async fn subscription_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionStatusResponse>, ApiError> {
    let subscription = state
        .billing
        .reconciler
        .subscription_state(&auth_user.user_id)
        .await?;

    Ok(Json(SubscriptionStatusResponse { subscription }))
}

/// Run the profile consistency checks and report violations.
pub async fn invariants_report(
    State(state): State<AppState>,
) -> Result<Json<platewise_billing::InvariantCheckSummary>, ApiError> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
