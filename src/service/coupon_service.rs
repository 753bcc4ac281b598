use std::sync::Arc;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        normalize_code, pricing, Coupon, CouponRejection, CouponValidation, Course,
        CreateCouponRequest, DiscountKind, PricedCoupon,
    },
    error::{AppError, Result},
    repository::{coupon_repository, CouponRepository, CourseRepository},
};

pub struct CouponService {
    pool: SqlitePool,
    coupon_repo: Arc<dyn CouponRepository>,
    course_repo: Arc<dyn CourseRepository>,
}

impl CouponService {
    pub fn new(
        pool: SqlitePool,
        coupon_repo: Arc<dyn CouponRepository>,
        course_repo: Arc<dyn CourseRepository>,
    ) -> Self {
        Self {
            pool,
            coupon_repo,
            course_repo,
        }
    }

    /// Advisory validation for UI feedback. Runs the same algorithm as the
    /// commit-time check inside the purchase transaction, so commit can only
    /// reject what preview accepted, never silently diverge.
    pub async fn preview(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        raw_code: &str,
    ) -> Result<CouponValidation> {
        let course = self
            .course_repo
            .find_by_id(course_id)
            .await?
            .filter(|c| c.published)
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        validate_for_course(&mut conn, raw_code, &course, user_id).await
    }

    pub async fn create_coupon(&self, request: CreateCouponRequest) -> Result<Coupon> {
        request.validate()?;

        if matches!(request.kind, DiscountKind::Percent) && !(1..=100).contains(&request.value) {
            return Err(AppError::Validation(
                "Percentage discount must be between 1 and 100".to_string(),
            ));
        }

        let code = normalize_code(&request.code)
            .ok_or_else(|| AppError::Validation("Coupon code must not be empty".to_string()))?;

        if self.coupon_repo.find_by_code(&code).await?.is_some() {
            return Err(AppError::Conflict("Coupon code already exists".to_string()));
        }

        self.coupon_repo.create(request).await
    }

    pub async fn link_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()> {
        self.coupon_repo
            .find_by_id(coupon_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        self.course_repo
            .find_by_id(course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

        self.coupon_repo.link_course(coupon_id, course_id).await
    }

    pub async fn unlink_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()> {
        self.coupon_repo
            .find_by_id(coupon_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        self.coupon_repo.unlink_course(coupon_id, course_id).await
    }
}

/// The coupon decision procedure, in policy order, short-circuiting on the
/// first failure. Written against a bare connection so the advisory preview
/// and the authoritative in-transaction call share one body.
pub(crate) async fn validate_for_course(
    conn: &mut SqliteConnection,
    raw_code: &str,
    course: &Course,
    user_id: Uuid,
) -> Result<CouponValidation> {
    let Some(code) = normalize_code(raw_code) else {
        return Ok(invalid(CouponRejection::NotFound));
    };

    let Some(coupon) = coupon_repository::find_by_code_on(conn, &code).await? else {
        return Ok(invalid(CouponRejection::NotFound));
    };

    if !coupon.is_active {
        return Ok(invalid(CouponRejection::Inactive));
    }

    let now = Utc::now();
    if let Some(starts_at) = coupon.starts_at {
        if now < starts_at {
            return Ok(invalid(CouponRejection::NotYetActive));
        }
    }
    if let Some(expires_at) = coupon.expires_at {
        if now > expires_at {
            return Ok(invalid(CouponRejection::Expired));
        }
    }

    // A missing cap means unlimited.
    if let Some(cap) = coupon.usage_cap {
        if coupon.usage_count >= cap {
            return Ok(invalid(CouponRejection::Exhausted));
        }
    }

    if !coupon_repository::is_linked_to_course_on(conn, coupon.id, course.id).await? {
        return Ok(invalid(CouponRejection::NotApplicable));
    }

    if has_paid_redemption(conn, user_id, course.id, coupon.id).await? {
        return Ok(invalid(CouponRejection::AlreadyUsed));
    }

    let quote = pricing::apply_discount(course.price_cents, coupon.kind, coupon.value);

    Ok(CouponValidation::Valid(PricedCoupon {
        coupon_id: coupon.id,
        code,
        original_cents: course.price_cents,
        discount_cents: quote.discount_cents,
        final_cents: quote.final_cents,
    }))
}

fn invalid(reason: CouponRejection) -> CouponValidation {
    CouponValidation::Invalid { reason }
}

/// One redemption per user per course, counted among paid enrollments only.
/// Abandoned and cancelled attempts do not use up the coupon.
async fn has_paid_redemption(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    course_id: Uuid,
    coupon_id: Uuid,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM enrollments
        WHERE user_id = ? AND course_id = ? AND coupon_id = ? AND status = 'Paid'
        "#,
    )
    .bind(user_id.to_string())
    .bind(course_id.to_string())
    .bind(coupon_id.to_string())
    .fetch_one(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(count > 0)
}
