//! Stripe webhook handling
//!
//! Verifies event signatures against the raw request body, parses the
//! payload into a closed event union, and dispatches into the reconciler.
//! Delivery is at-least-once: every transition taken here is idempotent,
//! and processed event ids are additionally recorded in a ledger so
//! duplicate deliveries short-circuit.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use platewise_shared::PlanKey;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::reconciler::SubscriptionReconciler;

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance (seconds).
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Events stuck in `processing` longer than this may be re-claimed.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// The billing events this service reacts to. Everything else lands in
/// `Ignored` and is acknowledged without effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `checkout.session.completed` - activates the purchasing profile.
    /// The metadata fields are optional because a permanently malformed
    /// event must still be acknowledged (see [`WebhookHandler::handle_event`]).
    CheckoutCompleted {
        event_id: String,
        user_id: Option<String>,
        plan: Option<PlanKey>,
        subscription_id: Option<String>,
    },
    /// `invoice.payment_failed` - deactivates the owning profile.
    InvoicePaymentFailed {
        event_id: String,
        subscription_id: Option<String>,
    },
    /// `customer.subscription.deleted` - same effect as a payment failure.
    SubscriptionDeleted {
        event_id: String,
        subscription_id: Option<String>,
    },
    Ignored {
        event_id: String,
        event_type: String,
    },
}

impl WebhookEvent {
    pub fn event_id(&self) -> &str {
        match self {
            Self::CheckoutCompleted { event_id, .. }
            | Self::InvoicePaymentFailed { event_id, .. }
            | Self::SubscriptionDeleted { event_id, .. }
            | Self::Ignored { event_id, .. } => event_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout.session.completed",
            Self::InvoicePaymentFailed { .. } => "invoice.payment_failed",
            Self::SubscriptionDeleted { .. } => "customer.subscription.deleted",
            Self::Ignored { event_type, .. } => event_type,
        }
    }
}

/// Verify a `stripe-signature` header against the raw payload.
///
/// The header carries `t=<unix>,v1=<hex hmac>`; the signed message is
/// `"{t}.{payload}"`. Verification must run on the raw body exactly as
/// received; re-serializing the JSON first invalidates the signature.
pub fn verify_signature(payload: &str, signature: &str, secret: &str) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0].trim() {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| {
            tracing::error!("System time error: {}", e);
            BillingError::WebhookSignatureInvalid
        })?
        .as_secs() as i64;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The "whsec_" prefix is part of the secret's display form, not the key.
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Parse a verified payload into the event union.
pub fn parse_event(payload: &str) -> BillingResult<WebhookEvent> {
    let event: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| BillingError::MalformedEvent(e.to_string()))?;

    let event_id = event["id"]
        .as_str()
        .ok_or_else(|| BillingError::MalformedEvent("missing event id".to_string()))?
        .to_string();
    let event_type = event["type"]
        .as_str()
        .ok_or_else(|| BillingError::MalformedEvent("missing event type".to_string()))?;

    let object = &event["data"]["object"];

    let parsed = match event_type {
        "checkout.session.completed" => WebhookEvent::CheckoutCompleted {
            event_id,
            user_id: object["metadata"]["user_id"].as_str().map(str::to_string),
            plan: object["metadata"]["plan"].as_str().and_then(PlanKey::parse),
            subscription_id: extract_subscription_ref(&object["subscription"]),
        },
        "invoice.payment_failed" => WebhookEvent::InvoicePaymentFailed {
            event_id,
            subscription_id: extract_subscription_ref(&object["subscription"]),
        },
        "customer.subscription.deleted" => WebhookEvent::SubscriptionDeleted {
            event_id,
            subscription_id: object["id"].as_str().map(str::to_string),
        },
        other => WebhookEvent::Ignored {
            event_id,
            event_type: other.to_string(),
        },
    };

    Ok(parsed)
}

/// A subscription reference arrives either as a bare id string or as an
/// expanded object carrying its own `id`.
fn extract_subscription_ref(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| value["id"].as_str().map(str::to_string))
}

/// Processed-event ledger backed by `stripe_webhook_events`.
///
/// The INSERT .. ON CONFLICT .. RETURNING claim ensures only one concurrent
/// delivery of an event id proceeds; events stuck in `processing` past the
/// timeout may be re-claimed.
#[derive(Clone)]
pub struct WebhookLedger {
    pool: PgPool,
}

impl WebhookLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim exclusive processing rights for an event id.
    /// Returns `false` if another delivery already holds or completed it.
    pub async fn claim(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE stripe_webhook_events.processing_result = 'processing'
              AND stripe_webhook_events.processing_started_at
                  < NOW() - ($3 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    /// Record the processing outcome for an event.
    pub async fn mark(&self, event_id: &str, result: &BillingResult<()>) {
        let (processing_result, error_message) = match result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to update webhook ledger record"
            );
        }
    }
}

/// Webhook handler for billing events.
pub struct WebhookHandler {
    webhook_secret: String,
    reconciler: Arc<SubscriptionReconciler>,
    /// Optional so dispatch logic is testable without Postgres; the server
    /// always wires a ledger in.
    ledger: Option<WebhookLedger>,
}

impl WebhookHandler {
    pub fn new(
        webhook_secret: String,
        reconciler: Arc<SubscriptionReconciler>,
        ledger: Option<WebhookLedger>,
    ) -> Self {
        Self {
            webhook_secret,
            reconciler,
            ledger,
        }
    }

    /// Verify and parse an incoming delivery. Any error here rejects the
    /// whole request so the sender redelivers.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        verify_signature(payload, signature, &self.webhook_secret)?;
        let event = parse_event(payload)?;

        tracing::info!(
            event_id = %event.event_id(),
            event_type = %event.kind(),
            "Webhook signature verified"
        );

        Ok(event)
    }

    /// Apply a verified event.
    ///
    /// Data-shape problems (missing metadata, unresolvable subscription id)
    /// are logged no-ops that still succeed: redelivery cannot fix a
    /// permanently malformed event, and failing it would only cause a retry
    /// storm. Transient failures (store, gateway) propagate so the sender
    /// retries.
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<()> {
        if let Some(ledger) = &self.ledger {
            if !ledger.claim(event.event_id(), event.kind()).await? {
                tracing::info!(
                    event_id = %event.event_id(),
                    event_type = %event.kind(),
                    "Duplicate webhook event - already processed"
                );
                return Ok(());
            }
        }

        let event_id = event.event_id().to_string();
        let result = self.apply(event).await;

        if let Some(ledger) = &self.ledger {
            ledger.mark(&event_id, &result).await;
        }

        result
    }

    async fn apply(&self, event: WebhookEvent) -> BillingResult<()> {
        match event {
            WebhookEvent::CheckoutCompleted {
                event_id,
                user_id,
                plan,
                subscription_id,
            } => {
                let (Some(user_id), Some(plan), Some(subscription_id)) =
                    (user_id, plan, subscription_id)
                else {
                    tracing::warn!(
                        event_id = %event_id,
                        "Checkout event missing metadata - acknowledging without effect"
                    );
                    return Ok(());
                };

                self.reconciler
                    .apply_checkout_completed(&user_id, None, plan, &subscription_id)
                    .await?;
            }
            WebhookEvent::InvoicePaymentFailed {
                event_id,
                subscription_id,
            } => {
                let Some(subscription_id) = subscription_id else {
                    tracing::warn!(
                        event_id = %event_id,
                        "Payment-failed event carries no subscription id - ignoring"
                    );
                    return Ok(());
                };

                self.reconciler
                    .deactivate_by_subscription(&subscription_id, "invoice.payment_failed")
                    .await?;
            }
            WebhookEvent::SubscriptionDeleted {
                event_id,
                subscription_id,
            } => {
                let Some(subscription_id) = subscription_id else {
                    tracing::warn!(
                        event_id = %event_id,
                        "Subscription-deleted event carries no id - ignoring"
                    );
                    return Ok(());
                };

                self.reconciler
                    .deactivate_by_subscription(&subscription_id, "customer.subscription.deleted")
                    .await?;
            }
            WebhookEvent::Ignored {
                event_id,
                event_type,
            } => {
                tracing::info!(
                    event_id = %event_id,
                    event_type = %event_type,
                    "Received unhandled billing event type - no handler configured"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    /// Sign a payload the way the processor does.
    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, sig)
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let payload = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        let header = sign(payload, now(), SECRET);
        assert!(verify_signature(payload, &header, SECRET).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let payload = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        let header = sign(payload, now(), SECRET);
        let tampered = r#"{"id":"evt_2","type":"invoice.payment_failed"}"#;
        assert!(matches!(
            verify_signature(tampered, &header, SECRET),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        let header = sign(payload, now() - SIGNATURE_TOLERANCE_SECS - 60, SECRET);
        assert!(matches!(
            verify_signature(payload, &header, SECRET),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        let header = sign(payload, now(), "whsec_other_secret");
        assert!(verify_signature(payload, &header, SECRET).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        let payload = r#"{"id":"evt_1"}"#;
        assert!(verify_signature(payload, "not-a-signature", SECRET).is_err());
        assert!(verify_signature(payload, "t=abc,v1=", SECRET).is_err());
        assert!(verify_signature(payload, "", SECRET).is_err());
    }

    #[test]
    fn parses_checkout_completed_with_metadata() {
        let payload = r#"{
            "id": "evt_cs_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_123",
                "subscription": "sub_123",
                "metadata": {"user_id": "user_abc", "plan": "month"}
            }}
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::CheckoutCompleted {
                event_id: "evt_cs_1".into(),
                user_id: Some("user_abc".into()),
                plan: Some(PlanKey::Month),
                subscription_id: Some("sub_123".into()),
            }
        );
    }

    #[test]
    fn parses_checkout_completed_with_missing_metadata() {
        let payload = r#"{
            "id": "evt_cs_2",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_456", "subscription": "sub_456"}}
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::CheckoutCompleted {
                event_id: "evt_cs_2".into(),
                user_id: None,
                plan: None,
                subscription_id: Some("sub_456".into()),
            }
        );
    }

    #[test]
    fn parses_expanded_subscription_object() {
        let payload = r#"{
            "id": "evt_inv_1",
            "type": "invoice.payment_failed",
            "data": {"object": {"id": "in_1", "subscription": {"id": "sub_789"}}}
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::InvoicePaymentFailed {
                event_id: "evt_inv_1".into(),
                subscription_id: Some("sub_789".into()),
            }
        );
    }

    #[test]
    fn parses_subscription_deleted() {
        let payload = r#"{
            "id": "evt_del_1",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_del", "status": "canceled"}}
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::SubscriptionDeleted {
                event_id: "evt_del_1".into(),
                subscription_id: Some("sub_del".into()),
            }
        );
    }

    #[test]
    fn unknown_event_type_is_ignored_variant() {
        let payload = r#"{
            "id": "evt_x",
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event_id: "evt_x".into(),
                event_type: "customer.created".into(),
            }
        );
    }

    #[test]
    fn rejects_payload_without_event_id() {
        let payload = r#"{"type": "invoice.payment_failed", "data": {"object": {}}}"#;
        assert!(matches!(
            parse_event(payload),
            Err(BillingError::MalformedEvent(_))
        ));
    }

    #[test]
    fn unrecognized_plan_metadata_parses_as_none() {
        let payload = r#"{
            "id": "evt_cs_3",
            "type": "checkout.session.completed",
            "data": {"object": {
                "subscription": "sub_1",
                "metadata": {"user_id": "user_1", "plan": "quarterly"}
            }}
        }"#;

        let event = parse_event(payload).unwrap();
        let WebhookEvent::CheckoutCompleted { plan, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(plan, None);
    }
}
