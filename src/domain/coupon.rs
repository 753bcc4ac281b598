use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    /// Stored normalized: trimmed, upper-cased.
    pub code: String,
    pub kind: DiscountKind,
    /// Percent (0-100) for `Percent`, minor currency units for `Fixed`.
    pub value: i64,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` means unlimited redemptions.
    pub usage_cap: Option<i64>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq)]
#[sqlx(type_name = "TEXT")]
pub enum DiscountKind {
    Percent,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 32))]
    pub code: String,
    pub kind: DiscountKind,
    #[validate(range(min = 1))]
    pub value: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub usage_cap: Option<i64>,
}

fn default_active() -> bool {
    true
}

/// Result of running a coupon code through the validator. `Valid` carries the
/// fully priced outcome so the preview endpoint and the commit-time check
/// present identical numbers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CouponValidation {
    Valid(PricedCoupon),
    Invalid { reason: CouponRejection },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PricedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub original_cents: i64,
    pub discount_cents: i64,
    pub final_cents: i64,
}

/// Why a coupon code was rejected. These are user-correctable outcomes and
/// are surfaced verbatim, unlike infrastructure errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CouponRejection {
    #[serde(rename = "coupon_not_found")]
    NotFound,
    #[serde(rename = "coupon_inactive")]
    Inactive,
    #[serde(rename = "coupon_not_yet_active")]
    NotYetActive,
    #[serde(rename = "coupon_expired")]
    Expired,
    #[serde(rename = "coupon_exhausted")]
    Exhausted,
    #[serde(rename = "coupon_not_applicable")]
    NotApplicable,
    #[serde(rename = "coupon_already_used")]
    AlreadyUsed,
}

impl CouponRejection {
    /// Stable machine-readable tag for API payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "coupon_not_found",
            CouponRejection::Inactive => "coupon_inactive",
            CouponRejection::NotYetActive => "coupon_not_yet_active",
            CouponRejection::Expired => "coupon_expired",
            CouponRejection::Exhausted => "coupon_exhausted",
            CouponRejection::NotApplicable => "coupon_not_applicable",
            CouponRejection::AlreadyUsed => "coupon_already_used",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "This coupon code was not found. Please check and try again.",
            CouponRejection::Inactive => "This coupon is no longer valid.",
            CouponRejection::NotYetActive => "This coupon is not active yet.",
            CouponRejection::Expired => "This coupon has expired.",
            CouponRejection::Exhausted => "This coupon has been fully redeemed.",
            CouponRejection::NotApplicable => "This coupon does not apply to this course.",
            CouponRejection::AlreadyUsed => "You have already used this coupon for this course.",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

/// Canonical form of a user-supplied coupon code: trimmed and upper-cased.
/// Returns `None` for input that is empty after trimming.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_code("  summer10 "), Some("SUMMER10".to_string()));
        assert_eq!(normalize_code("LAUNCH"), Some("LAUNCH".to_string()));
    }

    #[test]
    fn normalize_rejects_empty_input() {
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("   "), None);
    }

    #[test]
    fn rejection_tags_are_stable() {
        assert_eq!(CouponRejection::Exhausted.tag(), "coupon_exhausted");
        assert_eq!(CouponRejection::NotApplicable.tag(), "coupon_not_applicable");
    }
}
