//! Profile routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use platewise_billing::{Profile, ProfileStore};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Create the caller's profile.
///
/// Called once after first authentication. Returns 409 if the profile was
/// already created (for instance by a racing checkout webhook).
pub async fn create_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let email = auth_user.email.as_deref().unwrap_or("");

    let profile = state
        .billing
        .profiles
        .create(&auth_user.user_id, email)
        .await?;

    tracing::info!(user_id = %auth_user.user_id, "Profile created");

    Ok((StatusCode::CREATED, Json(profile)))
}
