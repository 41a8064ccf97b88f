//! Common types used across Platewise

use serde::{Deserialize, Serialize};

/// Subscription tier recorded on a profile.
///
/// `Free` is the default for every new profile; the paid tiers mirror the
/// three recurring plans in the price catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Week,
    Month,
    Year,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        Self::Free
    }
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Whether this tier corresponds to a paid plan.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key identifying one of the recurring plans in the price catalog.
///
/// Unlike [`SubscriptionTier`] there is no free variant: a plan key always
/// maps to a Stripe price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKey {
    Week,
    Month,
    Year,
}

impl PlanKey {
    /// Parse a plan key from its wire form. Returns `None` for anything
    /// outside the recognized set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// The tier a profile lands on when subscribed to this plan.
    pub fn tier(&self) -> SubscriptionTier {
        match self {
            Self::Week => SubscriptionTier::Week,
            Self::Month => SubscriptionTier::Month,
            Self::Year => SubscriptionTier::Year,
        }
    }
}

impl std::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_key_parses_only_recognized_keys() {
        assert_eq!(PlanKey::parse("week"), Some(PlanKey::Week));
        assert_eq!(PlanKey::parse("month"), Some(PlanKey::Month));
        assert_eq!(PlanKey::parse("year"), Some(PlanKey::Year));
        assert_eq!(PlanKey::parse("quarterly"), None);
        assert_eq!(PlanKey::parse("Month"), None);
        assert_eq!(PlanKey::parse(""), None);
    }

    #[test]
    fn plan_key_maps_to_paid_tier() {
        for plan in [PlanKey::Week, PlanKey::Month, PlanKey::Year] {
            assert!(plan.tier().is_paid());
            assert_eq!(plan.tier().as_str(), plan.as_str());
        }
    }

    #[test]
    fn tier_serde_is_lowercase() {
        let json = serde_json::to_string(&SubscriptionTier::Month).unwrap();
        assert_eq!(json, "\"month\"");
        let tier: SubscriptionTier = serde_json::from_str("\"free\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Free);
    }
}
