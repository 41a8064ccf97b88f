//! API error types and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use platewise_billing::BillingError;
use serde_json::json;

/// Errors surfaced at the handler boundary. Every variant maps to a status
/// code and a JSON body; handlers never crash the process.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidPlan(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    /// Webhook signature rejected; returned non-2xx so the sender retries.
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Billing provider error: {0}")]
    UpstreamBilling(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidPlan(_) | ApiError::BadRequest(_) | ApiError::SignatureInvalid => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamBilling(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::ProfileNotFound(_) | BillingError::SubscriptionNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            BillingError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            BillingError::InvalidPlan(_) => ApiError::InvalidPlan(e.to_string()),
            BillingError::WebhookSignatureInvalid => ApiError::SignatureInvalid,
            BillingError::MalformedEvent(_) => ApiError::BadRequest(e.to_string()),
            BillingError::StripeApi(_) => ApiError::UpstreamBilling(e.to_string()),
            BillingError::Database(_) => ApiError::Database(e.to_string()),
            BillingError::Config(_) | BillingError::Internal(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        let cases = [
            (
                ApiError::from(BillingError::ProfileNotFound("u".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(BillingError::InvalidPlan("daily".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(BillingError::AlreadyExists("u".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(BillingError::WebhookSignatureInvalid),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(BillingError::StripeApi("boom".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::from(BillingError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected);
        }
    }
}
