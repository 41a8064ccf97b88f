//! Billing error types

/// Errors produced by the billing crate.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// No profile exists for the given user id.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// A profile already exists for the given user id.
    #[error("Profile already exists: {0}")]
    AlreadyExists(String),

    /// No billing subscription is associated with the profile, or the
    /// referenced subscription no longer exists at the processor.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The requested plan key is not in the recognized set.
    #[error("Invalid plan '{0}'. Valid plans are: week, month, year")]
    InvalidPlan(String),

    /// Webhook signature verification failed. The event must be rejected
    /// with a non-2xx status so the sender redelivers it.
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// A signed webhook payload could not be parsed.
    #[error("Malformed webhook payload: {0}")]
    MalformedEvent(String),

    /// The billing processor call itself failed.
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}
