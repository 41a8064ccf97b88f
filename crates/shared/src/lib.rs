#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Shared types and database helpers for Platewise services.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{PlanKey, SubscriptionTier};
