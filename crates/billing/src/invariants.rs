//! Billing invariants
//!
//! Runnable consistency checks over the profile schema. Each invariant is a
//! read-only SQL query; violations carry enough context to debug. Intended
//! to be run after webhook replays or manual data surgery.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// A single invariant violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlement decisions may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct UserIdRow {
    user_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateSubRow {
    stripe_subscription_id: String,
    profile_count: i64,
}

/// Service for running profile invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary.
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_active_has_subscription_id().await?);
        violations.extend(self.check_subscription_id_unique().await?);
        violations.extend(self.check_paid_tier_is_active().await?);

        let checks_run = 3;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: an active subscription implies a subscription id.
    ///
    /// The converse is not required - a subscription id may linger briefly
    /// around a deactivation - but an active profile without one can never
    /// be reconciled against a billing event.
    async fn check_active_has_subscription_id(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UserIdRow> = sqlx::query_as(
            r#"
            SELECT user_id FROM profiles
            WHERE subscription_active AND stripe_subscription_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "active_has_subscription_id".to_string(),
            user_ids: rows.into_iter().map(|r| r.user_id).collect(),
            description: "Active profile without a billing subscription id - \
                          webhook events cannot deactivate it"
                .to_string(),
            severity: ViolationSeverity::Critical,
        }])
    }

    /// Invariant 2: a billing subscription id references at most one
    /// profile. Backed by a partial unique index; this catches drift if the
    /// index was ever dropped.
    async fn check_subscription_id_unique(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateSubRow> = sqlx::query_as(
            r#"
            SELECT stripe_subscription_id, COUNT(*) as profile_count
            FROM profiles
            WHERE stripe_subscription_id IS NOT NULL
            GROUP BY stripe_subscription_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscription_id_unique".to_string(),
                user_ids: vec![],
                description: format!(
                    "Subscription {} is referenced by {} profiles",
                    row.stripe_subscription_id, row.profile_count
                ),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: a paid tier implies an active subscription. Every
    /// deactivating transition resets the tier to free in the same update.
    async fn check_paid_tier_is_active(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UserIdRow> = sqlx::query_as(
            r#"
            SELECT user_id FROM profiles
            WHERE subscription_tier <> 'free' AND NOT subscription_active
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "paid_tier_is_active".to_string(),
            user_ids: rows.into_iter().map(|r| r.user_id).collect(),
            description: "Inactive profile still on a paid tier".to_string(),
            severity: ViolationSeverity::High,
        }])
    }
}
