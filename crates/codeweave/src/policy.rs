//! Plan tier → model selection.
//!
//! The engine only sees a model id, an output cap and a page limit. Which
//! ones a request gets depends on the caller's plan.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Billing plan of the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Teams,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Teams => "teams",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = std::convert::Infallible;

    /// Unknown names map to [`PlanTier::Free`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "pro" => PlanTier::Pro,
            "teams" | "team" => PlanTier::Teams,
            _ => PlanTier::Free,
        })
    }
}

/// What a tier gets per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSelection {
    pub model: String,
    /// Desired output cap handed to the budget allocator.
    pub desired_cap: u32,
    /// Page limit for this tier's sessions.
    pub max_pages: u32,
}

impl TierSelection {
    pub fn new(model: impl Into<String>, desired_cap: u32, max_pages: u32) -> Self {
        Self {
            model: model.into(),
            desired_cap,
            max_pages,
        }
    }
}

/// Loaded from `[tiers.free]`, `[tiers.pro]`, `[tiers.teams]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    pub free: TierSelection,
    pub pro: TierSelection,
    pub teams: TierSelection,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free: TierSelection::new(crate::DEFAULT_MODEL, 2_048, 3),
            pro: TierSelection::new("openai/gpt-4o", 4_096, 5),
            teams: TierSelection::new("anthropic/claude-sonnet-4", 8_192, 5),
        }
    }
}

impl TierPolicy {
    pub fn select(&self, tier: PlanTier) -> &TierSelection {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Pro => &self.pro,
            PlanTier::Teams => &self.teams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tiers_leniently() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!(" teams ".parse::<PlanTier>().unwrap(), PlanTier::Teams);
        assert_eq!("enterprise".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert_eq!(PlanTier::Teams.to_string(), "teams");
    }

    #[test]
    fn free_tier_is_smallest() {
        let policy = TierPolicy::default();
        let free = policy.select(PlanTier::Free);
        assert_eq!(free.model, crate::DEFAULT_MODEL);
        assert!(free.desired_cap < policy.select(PlanTier::Pro).desired_cap);
        assert!(policy.select(PlanTier::Pro).desired_cap < policy.select(PlanTier::Teams).desired_cap);
    }

    #[test]
    fn tier_serde_is_lowercase() {
        let json = serde_json::to_string(&PlanTier::Pro).unwrap();
        assert_eq!(json, "\"pro\"");
        let tier: PlanTier = serde_json::from_str("\"teams\"").unwrap();
        assert_eq!(tier, PlanTier::Teams);
    }
}
