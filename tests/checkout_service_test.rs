use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use coursehub::{
    config::GatewayConfig,
    domain::{
        CouponRejection, CreateCouponRequest, CreateCourseRequest, CreateUserRequest,
        DiscountKind, EnrollmentStatus, UserRole,
    },
    error::AppError,
    payments::HmacRedirectGateway,
    ratelimit::FixedWindowLimiter,
    repository::{
        CouponRepository, CourseRepository, EnrollmentRepository, SqliteCouponRepository,
        SqliteCourseRepository, SqliteEnrollmentRepository, SqliteUserRepository, UserRepository,
    },
    service::{CheckoutOutcome, CheckoutPolicy, CheckoutService, SettlementStatus},
};

const GATEWAY_SECRET: &str = "test-secret";

fn client_ip() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        pay_url: "https://sandbox.gateway.example/pay".to_string(),
        merchant_code: "TESTMERCHANT".to_string(),
        secret: GATEWAY_SECRET.to_string(),
        return_url: "http://localhost:8080/payments/gateway/return".to_string(),
    }
}

async fn setup_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

struct Fixture {
    pool: SqlitePool,
    service: CheckoutService,
    user_repo: SqliteUserRepository,
    course_repo: SqliteCourseRepository,
    coupon_repo: SqliteCouponRepository,
    enrollment_repo: SqliteEnrollmentRepository,
    user_id: Uuid,
    course_id: Uuid,
}

async fn setup(price_cents: i64, max_attempts: u32) -> anyhow::Result<Fixture> {
    let pool = setup_pool().await?;

    let service = CheckoutService::new(
        pool.clone(),
        Arc::new(HmacRedirectGateway::new(gateway_config())),
        Arc::new(FixedWindowLimiter::new(
            Duration::from_secs(60),
            max_attempts,
        )),
        CheckoutPolicy {
            platform_fee_percent: 30,
        },
    );

    let user_repo = SqliteUserRepository::new(pool.clone());
    let course_repo = SqliteCourseRepository::new(pool.clone());
    let coupon_repo = SqliteCouponRepository::new(pool.clone());
    let enrollment_repo = SqliteEnrollmentRepository::new(pool.clone());

    let user = user_repo
        .create(CreateUserRequest {
            email: "buyer@example.com".to_string(),
            display_name: "Buyer".to_string(),
            role: UserRole::Learner,
        })
        .await?;

    let course = course_repo
        .create(CreateCourseRequest {
            title: "Practical Rust".to_string(),
            slug: "practical-rust".to_string(),
            description: String::new(),
            price_cents,
            published: true,
            owner_id: user.id,
        })
        .await?;

    Ok(Fixture {
        pool,
        service,
        user_repo,
        course_repo,
        coupon_repo,
        enrollment_repo,
        user_id: user.id,
        course_id: course.id,
    })
}

async fn create_linked_coupon(
    fx: &Fixture,
    code: &str,
    value: i64,
    cap: Option<i64>,
) -> anyhow::Result<Uuid> {
    let coupon = fx
        .coupon_repo
        .create(CreateCouponRequest {
            code: code.to_string(),
            kind: DiscountKind::Percent,
            value,
            is_active: true,
            starts_at: None,
            expires_at: None,
            usage_cap: cap,
        })
        .await?;
    fx.coupon_repo.link_course(coupon.id, fx.course_id).await?;
    Ok(coupon.id)
}

async fn usage_count(pool: &SqlitePool, coupon_id: Uuid) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT usage_count FROM coupons WHERE id = ?")
        .bind(coupon_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn enrollment_count(pool: &SqlitePool, user_id: Uuid, course_id: Uuid) -> anyhow::Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND course_id = ?")
            .bind(user_id.to_string())
            .bind(course_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Builds signed settlement params the way the gateway would.
fn signed_settlement_params(
    txn_ref: Uuid,
    amount_cents: i64,
    gateway_txn: &str,
    result: &str,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("txn_ref".to_string(), txn_ref.to_string());
    params.insert("amount".to_string(), amount_cents.to_string());
    params.insert("gateway_txn".to_string(), gateway_txn.to_string());
    params.insert("result".to_string(), result.to_string());

    let canonical = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac =
        Hmac::<Sha512>::new_from_slice(GATEWAY_SECRET.as_bytes()).expect("hmac accepts any key");
    mac.update(canonical.as_bytes());
    params.insert(
        "signature".to_string(),
        hex::encode(mac.finalize().into_bytes()),
    );

    params
}

#[tokio::test]
async fn paid_path_creates_pending_enrollment_and_redirects() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    let outcome = fx
        .service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;

    let url = match outcome {
        CheckoutOutcome::Redirect { url } => url,
        other => panic!("expected redirect, got {:?}", other),
    };
    assert!(url.starts_with("https://sandbox.gateway.example/pay?"));
    assert!(url.contains("amount=100000"));

    let enrollment = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    assert_eq!(enrollment.status, EnrollmentStatus::Pending);
    assert_eq!(enrollment.gross_cents, 100_000);
    assert_eq!(enrollment.fee_cents, 30_000);
    assert_eq!(enrollment.net_cents, 70_000);
    assert_eq!(enrollment.coupon_id, None);
    assert!(url.contains(&enrollment.id.to_string()));

    Ok(())
}

#[tokio::test]
async fn full_discount_takes_free_path() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;
    let coupon_id = create_linked_coupon(&fx, "SCHOLARSHIP", 100, Some(5)).await?;

    let outcome = fx
        .service
        .purchase(fx.user_id, fx.course_id, Some("SCHOLARSHIP"), client_ip())
        .await?;

    assert_eq!(
        outcome,
        CheckoutOutcome::Enrolled {
            course_slug: "practical-rust".to_string()
        }
    );

    let enrollment = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    assert_eq!(enrollment.status, EnrollmentStatus::Paid);
    assert_eq!(enrollment.gross_cents, 0);
    assert_eq!(enrollment.fee_cents, 0);
    assert_eq!(enrollment.net_cents, 0);
    assert_eq!(enrollment.coupon_id, Some(coupon_id));

    // Free-path redemption settles immediately, so the counter moves now.
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn repurchasing_a_paid_course_is_idempotent() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;
    let coupon_id = create_linked_coupon(&fx, "SCHOLARSHIP", 100, Some(5)).await?;

    let first = fx
        .service
        .purchase(fx.user_id, fx.course_id, Some("SCHOLARSHIP"), client_ip())
        .await?;
    assert!(matches!(first, CheckoutOutcome::Enrolled { .. }));

    let before = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    // Second and third attempts succeed without writing anything.
    for _ in 0..2 {
        let again = fx
            .service
            .purchase(fx.user_id, fx.course_id, Some("SCHOLARSHIP"), client_ip())
            .await?;
        assert_eq!(again, CheckoutOutcome::AlreadyPurchased);
    }

    let after = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    assert_eq!(before.id, after.id);
    assert_eq!(before.updated_at, after.updated_at);
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 1);
    assert_eq!(enrollment_count(&fx.pool, fx.user_id, fx.course_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn stale_pending_row_is_replaced_not_reused() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    // First attempt without a coupon is abandoned at the gateway.
    let first = fx
        .service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;
    assert!(matches!(first, CheckoutOutcome::Redirect { .. }));

    let stale = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");
    assert_eq!(stale.gross_cents, 100_000);

    // Retry with a 10% coupon: fresh row, fresh pricing.
    let coupon_id = create_linked_coupon(&fx, "TENOFF", 10, Some(10)).await?;
    let retry = fx
        .service
        .purchase(fx.user_id, fx.course_id, Some("TENOFF"), client_ip())
        .await?;
    assert!(matches!(retry, CheckoutOutcome::Redirect { .. }));

    let fresh = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    assert_ne!(stale.id, fresh.id);
    assert_eq!(fresh.gross_cents, 90_000);
    assert_eq!(fresh.coupon_id, Some(coupon_id));
    assert_eq!(enrollment_count(&fx.pool, fx.user_id, fx.course_id).await?, 1);

    // Pending-path purchases never touch the counter.
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 0);

    Ok(())
}

#[tokio::test]
async fn coupon_cap_is_shared_across_users() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;
    let coupon_id = create_linked_coupon(&fx, "SCHOLARSHIP", 100, Some(2)).await?;

    let mut buyers = vec![fx.user_id];
    for i in 0..2 {
        let user = fx
            .user_repo
            .create(CreateUserRequest {
                email: format!("buyer{}@example.com", i),
                display_name: format!("Buyer {}", i),
                role: UserRole::Learner,
            })
            .await?;
        buyers.push(user.id);
    }

    // Cap 2: first two users redeem, the third is rejected.
    for user_id in &buyers[..2] {
        let outcome = fx
            .service
            .purchase(*user_id, fx.course_id, Some("SCHOLARSHIP"), client_ip())
            .await?;
        assert!(matches!(outcome, CheckoutOutcome::Enrolled { .. }));
    }

    let err = fx
        .service
        .purchase(buyers[2], fx.course_id, Some("SCHOLARSHIP"), client_ip())
        .await
        .expect_err("third redemption must fail");
    assert!(matches!(
        err,
        AppError::Coupon(CouponRejection::Exhausted)
    ));

    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 2);

    Ok(())
}

#[tokio::test]
async fn commit_time_validation_rejects_coupon_exhausted_after_preview() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;
    let coupon_id = create_linked_coupon(&fx, "LASTONE", 100, Some(1)).await?;

    // A concurrent purchaser takes the last redemption between the buyer's
    // preview and their purchase click.
    sqlx::query("UPDATE coupons SET usage_count = 1 WHERE id = ?")
        .bind(coupon_id.to_string())
        .execute(&fx.pool)
        .await?;

    let err = fx
        .service
        .purchase(fx.user_id, fx.course_id, Some("LASTONE"), client_ip())
        .await
        .expect_err("purchase must not fall back to full price");
    assert!(matches!(
        err,
        AppError::Coupon(CouponRejection::Exhausted)
    ));

    // Nothing was written.
    assert_eq!(enrollment_count(&fx.pool, fx.user_id, fx.course_id).await?, 0);
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn settlement_completes_pending_enrollment_once() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;
    let coupon_id = create_linked_coupon(&fx, "TENOFF", 10, Some(10)).await?;

    let outcome = fx
        .service
        .purchase(fx.user_id, fx.course_id, Some("TENOFF"), client_ip())
        .await?;
    assert!(matches!(outcome, CheckoutOutcome::Redirect { .. }));

    let pending = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    let status = fx
        .service
        .apply_settlement(pending.id, pending.gross_cents, "GW-1", true)
        .await?;
    assert_eq!(status, SettlementStatus::Completed);

    let paid = fx
        .enrollment_repo
        .find_by_id(pending.id)
        .await?
        .expect("enrollment row should exist");
    assert_eq!(paid.status, EnrollmentStatus::Paid);
    assert_eq!(paid.gateway_ref.as_deref(), Some("GW-1"));
    assert_eq!(paid.net_cents, paid.gross_cents - paid.fee_cents);
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 1);

    // The gateway re-delivers the same notification; nothing changes.
    let repeat = fx
        .service
        .apply_settlement(pending.id, pending.gross_cents, "GW-1", true)
        .await?;
    assert_eq!(repeat, SettlementStatus::AlreadyProcessed);
    assert_eq!(usage_count(&fx.pool, coupon_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn failed_settlement_cancels_and_allows_retry() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    let outcome = fx
        .service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;
    assert!(matches!(outcome, CheckoutOutcome::Redirect { .. }));

    let pending = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    let status = fx
        .service
        .apply_settlement(pending.id, pending.gross_cents, "GW-2", false)
        .await?;
    assert_eq!(status, SettlementStatus::Cancelled);

    let cancelled = fx
        .enrollment_repo
        .find_by_id(pending.id)
        .await?
        .expect("enrollment row should exist");
    assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);

    // The buyer can try again; the cancelled row is replaced.
    let retry = fx
        .service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;
    assert!(matches!(retry, CheckoutOutcome::Redirect { .. }));
    assert_eq!(enrollment_count(&fx.pool, fx.user_id, fx.course_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn settlement_amount_mismatch_is_rejected() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    fx.service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;

    let pending = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    let err = fx
        .service
        .apply_settlement(pending.id, 1, "GW-3", true)
        .await
        .expect_err("mismatched amount must be rejected");
    assert!(matches!(err, AppError::BadRequest(_)));

    let unchanged = fx
        .enrollment_repo
        .find_by_id(pending.id)
        .await?
        .expect("enrollment row should exist");
    assert_eq!(unchanged.status, EnrollmentStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn signed_callback_settles_end_to_end() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    fx.service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await?;

    let pending = fx
        .enrollment_repo
        .find_by_pair(fx.user_id, fx.course_id)
        .await?
        .expect("enrollment row should exist");

    let params = signed_settlement_params(pending.id, pending.gross_cents, "GW-4", "00");
    let status = fx.service.settle(&params).await?;
    assert_eq!(status, SettlementStatus::Completed);

    // Tampering with the amount after signing must be caught.
    let mut tampered = signed_settlement_params(pending.id, pending.gross_cents, "GW-4", "00");
    tampered.insert("amount".to_string(), "1".to_string());
    let err = fx
        .service
        .settle(&tampered)
        .await
        .expect_err("tampered signature must be rejected");
    assert!(matches!(err, AppError::BadRequest(_)));

    Ok(())
}

#[tokio::test]
async fn purchase_attempts_are_rate_limited_per_user() -> anyhow::Result<()> {
    let fx = setup(100_000, 2).await?;

    for _ in 0..2 {
        fx.service
            .purchase(fx.user_id, fx.course_id, None, client_ip())
            .await?;
    }

    let err = fx
        .service
        .purchase(fx.user_id, fx.course_id, None, client_ip())
        .await
        .expect_err("third attempt in the window must be limited");
    assert!(matches!(err, AppError::RateLimited { .. }));

    // A different user is unaffected.
    let other = fx
        .user_repo
        .create(CreateUserRequest {
            email: "other@example.com".to_string(),
            display_name: "Other".to_string(),
            role: UserRole::Learner,
        })
        .await?;
    let outcome = fx
        .service
        .purchase(other.id, fx.course_id, None, client_ip())
        .await?;
    assert!(matches!(outcome, CheckoutOutcome::Redirect { .. }));

    Ok(())
}

#[tokio::test]
async fn unknown_course_is_rejected_before_any_write() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    let err = fx
        .service
        .purchase(fx.user_id, Uuid::new_v4(), None, client_ip())
        .await
        .expect_err("unknown course must be rejected");
    assert!(matches!(err, AppError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn unpublished_course_cannot_be_purchased() -> anyhow::Result<()> {
    let fx = setup(100_000, 100).await?;

    let hidden = fx
        .course_repo
        .create(CreateCourseRequest {
            title: "Draft Course".to_string(),
            slug: "draft-course".to_string(),
            description: String::new(),
            price_cents: 50_000,
            published: false,
            owner_id: fx.user_id,
        })
        .await?;

    let err = fx
        .service
        .purchase(fx.user_id, hidden.id, None, client_ip())
        .await
        .expect_err("unpublished course must be rejected");
    assert!(matches!(err, AppError::NotFound(_)));

    Ok(())
}
