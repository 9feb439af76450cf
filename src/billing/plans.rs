use serde::{Deserialize, Serialize, Serializer};

/// key: plan-catalog -> closed set of sellable tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Plus,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Plus => "plus",
            PlanTier::Pro => "pro",
        }
    }

    /// Unknown or retired keys resolve to the lowest tier rather than failing.
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "plus" => PlanTier::Plus,
            "pro" => PlanTier::Pro,
            _ => PlanTier::Free,
        }
    }
}

/// Image allowance for a tier. Serializes as a number, or null for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLimit {
    Limited(u32),
    Unlimited,
}

impl ImageLimit {
    pub fn allows(&self, current_count: u32) -> bool {
        match self {
            ImageLimit::Unlimited => true,
            ImageLimit::Limited(max) => current_count < *max,
        }
    }

    pub fn remaining(&self, current_count: u32) -> ImageLimit {
        match self {
            ImageLimit::Unlimited => ImageLimit::Unlimited,
            ImageLimit::Limited(max) => ImageLimit::Limited(max.saturating_sub(current_count)),
        }
    }
}

impl Serialize for ImageLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ImageLimit::Limited(count) => serializer.serialize_some(count),
            ImageLimit::Unlimited => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEntitlements {
    pub tier: PlanTier,
    pub display_name: &'static str,
    pub currency: &'static str,
    pub amount_cents: i64,
    pub max_images: ImageLimit,
    pub features: &'static [&'static str],
}

static FREE: PlanEntitlements = PlanEntitlements {
    tier: PlanTier::Free,
    display_name: "Free",
    currency: "brl",
    amount_cents: 0,
    max_images: ImageLimit::Limited(1),
    features: &["1 menu image", "Public menu page"],
};

static PLUS: PlanEntitlements = PlanEntitlements {
    tier: PlanTier::Plus,
    display_name: "Plus",
    currency: "brl",
    amount_cents: 1200,
    max_images: ImageLimit::Limited(3),
    features: &["3 menu images", "Public menu page", "Priority support"],
};

static PRO: PlanEntitlements = PlanEntitlements {
    tier: PlanTier::Pro,
    display_name: "Pro",
    currency: "brl",
    amount_cents: 2500,
    max_images: ImageLimit::Unlimited,
    features: &["Unlimited menu images", "Public menu page", "Priority support"],
};

pub fn entitlements(tier: PlanTier) -> &'static PlanEntitlements {
    match tier {
        PlanTier::Free => &FREE,
        PlanTier::Plus => &PLUS,
        PlanTier::Pro => &PRO,
    }
}

pub fn plan_catalog() -> Vec<&'static PlanEntitlements> {
    vec![&FREE, &PLUS, &PRO]
}
