//! Subscription plans sold through Stripe.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How long a purchased plan stays active.
pub const PLAN_DURATION_DAYS: i64 = 30;

/// Plan tier enumeration.
///
/// The paid tiers correspond to Stripe product names ("Test Leap", "Demo",
/// "Starter", "Creator", "Team").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    TestLeap,
    Demo,
    Starter,
    Creator,
    Team,
}

impl PlanTier {
    pub const PAID: [PlanTier; 5] = [
        PlanTier::TestLeap,
        PlanTier::Demo,
        PlanTier::Starter,
        PlanTier::Creator,
        PlanTier::Team,
    ];

    /// Parse a stored value or a Stripe product name.
    ///
    /// Case, spaces, hyphens and underscores are ignored, so "Test Leap",
    /// "test_leap" and "TEST-LEAP" all resolve to the same tier.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "free" => Some(PlanTier::Free),
            "testleap" => Some(PlanTier::TestLeap),
            "demo" => Some(PlanTier::Demo),
            "starter" => Some(PlanTier::Starter),
            "creator" => Some(PlanTier::Creator),
            "team" => Some(PlanTier::Team),
            _ => None,
        }
    }

    /// Parse, falling back to `Free` for unknown values.
    pub fn from_str_or_free(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::TestLeap => "test_leap",
            PlanTier::Demo => "demo",
            PlanTier::Starter => "starter",
            PlanTier::Creator => "creator",
            PlanTier::Team => "team",
        }
    }

    /// Name shown to customers (matches the Stripe product name).
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanTier::Free => "Free",
            PlanTier::TestLeap => "Test Leap",
            PlanTier::Demo => "Demo",
            PlanTier::Starter => "Starter",
            PlanTier::Creator => "Creator",
            PlanTier::Team => "Team",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription state stored on the user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    #[default]
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    pub fn from_str_or_inactive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => SubscriptionStatus::Active,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stripe_names() {
        assert_eq!(PlanTier::parse("Test Leap"), Some(PlanTier::TestLeap));
        assert_eq!(PlanTier::parse("Demo"), Some(PlanTier::Demo));
        assert_eq!(PlanTier::parse("Starter"), Some(PlanTier::Starter));
        assert_eq!(PlanTier::parse("Creator"), Some(PlanTier::Creator));
        assert_eq!(PlanTier::parse("Team"), Some(PlanTier::Team));
    }

    #[test]
    fn test_parse_is_lenient_about_separators_and_case() {
        assert_eq!(PlanTier::parse("test_leap"), Some(PlanTier::TestLeap));
        assert_eq!(PlanTier::parse("TEST-LEAP"), Some(PlanTier::TestLeap));
        assert_eq!(PlanTier::parse("  team "), Some(PlanTier::Team));
        assert_eq!(PlanTier::parse("enterprise"), None);
    }

    #[test]
    fn test_stored_form_roundtrips() {
        for tier in PlanTier::PAID.iter().chain(std::iter::once(&PlanTier::Free)) {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(*tier));
            assert_eq!(PlanTier::parse(tier.display_name()), Some(*tier));
        }
    }

    #[test]
    fn test_unknown_falls_back_to_free() {
        assert_eq!(PlanTier::from_str_or_free("gold"), PlanTier::Free);
        assert!(!PlanTier::Free.is_paid());
        assert!(PlanTier::Demo.is_paid());
    }

    #[test]
    fn test_subscription_status() {
        assert_eq!(SubscriptionStatus::from_str_or_inactive("ACTIVE"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_str_or_inactive(""), SubscriptionStatus::Inactive);
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::Active).unwrap(),
            "\"active\""
        );
    }
}
