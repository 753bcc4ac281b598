use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{pricing, CouponRejection, CouponValidation, EnrollmentStatus},
    error::{AppError, Result},
    payments::{PaymentGateway, RedirectRequest},
    ratelimit::{Decision, RateLimiter},
    repository::{
        course_repository, enrollment_repository, enrollment_repository::status_to_str,
    },
    service::coupon_service,
};

/// Outcome of a purchase attempt. "Already purchased" is a success, not an
/// error; the caller is simply told nothing had to happen.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    AlreadyPurchased,
    /// Free path: the discount covered the whole price and the enrollment
    /// is immediately paid.
    Enrolled { course_slug: String },
    /// Paid path: the buyer must complete payment at the gateway.
    Redirect { url: String },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Completed,
    Cancelled,
    /// Re-delivery of a settlement already applied; nothing was written.
    AlreadyProcessed,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckoutPolicy {
    pub platform_fee_percent: i64,
}

pub struct CheckoutService {
    pool: SqlitePool,
    gateway: Arc<dyn PaymentGateway>,
    limiter: Arc<dyn RateLimiter>,
    policy: CheckoutPolicy,
}

impl CheckoutService {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        limiter: Arc<dyn RateLimiter>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            pool,
            gateway,
            limiter,
            policy,
        }
    }

    /// Runs one purchase attempt end to end. Steps 1-3 are side-effect-free;
    /// everything from the stale-row delete onwards happens in a single
    /// transaction, so a failure at any point leaves no half-written row.
    pub async fn purchase(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        coupon_code: Option<&str>,
        client_ip: IpAddr,
    ) -> Result<CheckoutOutcome> {
        if let Decision::Deny { retry_after } = self.limiter.check(user_id).await {
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            course_repository::find_by_id_on(&mut conn, course_id)
                .await?
                .filter(|c| c.published)
                .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

            // Already owned: success, without touching the row or the coupon.
            if let Some(existing) =
                enrollment_repository::find_by_pair_on(&mut conn, user_id, course_id).await?
            {
                if existing.status == EnrollmentStatus::Paid {
                    return Ok(CheckoutOutcome::AlreadyPurchased);
                }
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // A Pending or Cancelled leftover from an earlier attempt is
        // replaced wholesale, never reused: its pricing and coupon linkage
        // may no longer hold.
        sqlx::query("DELETE FROM enrollments WHERE user_id = ? AND course_id = ? AND status != 'Paid'")
            .bind(user_id.to_string())
            .bind(course_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Re-read the price at commit time; the advisory read above may be stale.
        let course = course_repository::find_by_id_on(&mut tx, course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

        let priced = match coupon_code {
            Some(raw) => {
                match coupon_service::validate_for_course(&mut tx, raw, &course, user_id).await? {
                    CouponValidation::Valid(priced) => Some(priced),
                    // A coupon that previewed fine but fails now (e.g.
                    // exhausted by a concurrent redemption) blocks the
                    // purchase; it must not fall back to full price.
                    CouponValidation::Invalid { reason } => {
                        return Err(AppError::Coupon(reason));
                    }
                }
            }
            None => None,
        };

        let final_cents = priced
            .as_ref()
            .map(|p| p.final_cents)
            .unwrap_or(course.price_cents);
        let coupon_id = priced.as_ref().map(|p| p.coupon_id);

        let enrollment_id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        if final_cents <= 0 {
            insert_enrollment(
                &mut tx,
                enrollment_id,
                user_id,
                course_id,
                EnrollmentStatus::Paid,
                0,
                0,
                coupon_id,
                now,
            )
            .await?;

            if let Some(coupon_id) = coupon_id {
                if !increment_usage_guarded(&mut tx, coupon_id, now).await? {
                    tx.rollback()
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;
                    return Err(AppError::Coupon(CouponRejection::Exhausted));
                }
            }

            tx.commit()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            tracing::info!(user = %user_id, course = %course.slug, "free-path enrollment completed");

            Ok(CheckoutOutcome::Enrolled {
                course_slug: course.slug,
            })
        } else {
            let fee_cents = pricing::platform_fee(final_cents, self.policy.platform_fee_percent);

            insert_enrollment(
                &mut tx,
                enrollment_id,
                user_id,
                course_id,
                EnrollmentStatus::Pending,
                final_cents,
                fee_cents,
                coupon_id,
                now,
            )
            .await?;

            // The coupon counter is NOT incremented here; it increments only
            // on confirmed settlement, with the same guard.
            let url = self.gateway.build_redirect_url(&RedirectRequest {
                amount_cents: final_cents,
                txn_ref: enrollment_id,
                order_info: format!("Course {}", course.title),
                client_ip,
            })?;

            tx.commit()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            tracing::info!(
                user = %user_id,
                course = %course.slug,
                amount = final_cents,
                "pending enrollment created, redirecting to gateway"
            );

            Ok(CheckoutOutcome::Redirect { url })
        }
    }

    /// Entry point for the gateway's settlement callback. Verifies the
    /// signature, then applies the transition. Idempotent: the gateway may
    /// deliver the same notification more than once.
    pub async fn settle(&self, params: &BTreeMap<String, String>) -> Result<SettlementStatus> {
        self.gateway.verify_return(params)?;

        let txn_ref = params
            .get("txn_ref")
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::BadRequest("Missing or invalid txn_ref".to_string()))?;

        let amount_cents: i64 = params
            .get("amount")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AppError::BadRequest("Missing or invalid amount".to_string()))?;

        let gateway_txn = params
            .get("gateway_txn")
            .cloned()
            .ok_or_else(|| AppError::BadRequest("Missing gateway_txn".to_string()))?;

        let success = params.get("result").map(|r| r == "00").unwrap_or(false);

        self.apply_settlement(txn_ref, amount_cents, &gateway_txn, success)
            .await
    }

    pub async fn apply_settlement(
        &self,
        txn_ref: Uuid,
        amount_cents: i64,
        gateway_txn: &str,
        success: bool,
    ) -> Result<SettlementStatus> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let enrollment = enrollment_repository::find_by_id_on(&mut tx, txn_ref)
            .await?
            .ok_or_else(|| AppError::NotFound("Unknown transaction reference".to_string()))?;

        match enrollment.status {
            EnrollmentStatus::Paid => {
                if success {
                    Ok(SettlementStatus::AlreadyProcessed)
                } else {
                    Err(AppError::Conflict(
                        "Settlement conflicts with already-paid enrollment".to_string(),
                    ))
                }
            }
            EnrollmentStatus::Cancelled => {
                if success {
                    Err(AppError::Conflict(
                        "Settlement conflicts with cancelled enrollment".to_string(),
                    ))
                } else {
                    Ok(SettlementStatus::AlreadyProcessed)
                }
            }
            EnrollmentStatus::Pending => {
                if success && amount_cents != enrollment.gross_cents {
                    return Err(AppError::BadRequest(
                        "Settlement amount does not match enrollment".to_string(),
                    ));
                }

                let now = Utc::now().naive_utc();
                let target = if success {
                    EnrollmentStatus::Paid
                } else {
                    EnrollmentStatus::Cancelled
                };

                let updated = sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET status = ?, gateway_ref = ?, updated_at = ?
                    WHERE id = ? AND status = 'Pending'
                    "#,
                )
                .bind(status_to_str(&target))
                .bind(gateway_txn)
                .bind(now)
                .bind(txn_ref.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .rows_affected();

                if updated == 0 {
                    return Err(AppError::Conflict(
                        "Enrollment settled concurrently".to_string(),
                    ));
                }

                if success {
                    if let Some(coupon_id) = enrollment.coupon_id {
                        if !increment_usage_guarded(&mut tx, coupon_id, now).await? {
                            tx.rollback()
                                .await
                                .map_err(|e| AppError::Database(e.to_string()))?;
                            tracing::error!(
                                enrollment = %txn_ref,
                                coupon = %coupon_id,
                                "coupon cap reached between checkout and settlement"
                            );
                            return Err(AppError::Coupon(CouponRejection::Exhausted));
                        }
                    }
                }

                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                if success {
                    tracing::info!(enrollment = %txn_ref, "settlement completed");
                    Ok(SettlementStatus::Completed)
                } else {
                    tracing::info!(enrollment = %txn_ref, "settlement reported failure, enrollment cancelled");
                    Ok(SettlementStatus::Cancelled)
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_enrollment(
    conn: &mut SqliteConnection,
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    status: EnrollmentStatus,
    gross_cents: i64,
    fee_cents: i64,
    coupon_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO enrollments (
            id, user_id, course_id, status, gross_cents, fee_cents,
            net_cents, coupon_id, gateway_ref, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(course_id.to_string())
    .bind(status_to_str(&status))
    .bind(gross_cents)
    .bind(fee_cents)
    .bind(gross_cents - fee_cents)
    .bind(coupon_id.map(|c| c.to_string()))
    .bind(now)
    .bind(now)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            // Losing the race on UNIQUE(user_id, course_id) means another
            // attempt for the same pair committed first; report it as a
            // system error rather than overwriting the winner.
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                tracing::warn!(user = %user_id, course = %course_id, "lost enrollment uniqueness race");
            }
            Err(AppError::Database(e.to_string()))
        }
    }
}

/// The one place concurrent purchasers race on shared state. The cap check
/// is part of the UPDATE itself; zero rows affected means the cap was hit
/// by a concurrent transaction and the caller must roll back.
async fn increment_usage_guarded(
    conn: &mut SqliteConnection,
    coupon_id: Uuid,
    now: NaiveDateTime,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE coupons
        SET usage_count = usage_count + 1, updated_at = ?
        WHERE id = ? AND (usage_cap IS NULL OR usage_count < usage_cap)
        "#,
    )
    .bind(now)
    .bind(coupon_id.to_string())
    .execute(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}
