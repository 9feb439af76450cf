use serde::Serialize;

use super::plans::{self, ImageLimit, PlanTier};

/// key: entitlement-check -> upload gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadCheck {
    pub allowed: bool,
    pub limit: ImageLimit,
    pub remaining: ImageLimit,
}

/// Pure read of the catalog; callers supply the stored count and react to the verdict.
pub fn check_upload(current_count: u32, tier: PlanTier) -> UploadCheck {
    let max_images = plans::entitlements(tier).max_images;
    UploadCheck {
        allowed: max_images.allows(current_count),
        limit: max_images,
        remaining: max_images.remaining(current_count),
    }
}
