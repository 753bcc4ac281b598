pub mod checkout_service;
pub mod coupon_service;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::SessionStore;
use crate::payments::PaymentGateway;
use crate::ratelimit::RateLimiter;
use crate::repository::*;

pub use checkout_service::{CheckoutOutcome, CheckoutPolicy, CheckoutService, SettlementStatus};
pub use coupon_service::CouponService;

pub struct ServiceContext {
    pub user_repo: Arc<dyn UserRepository>,
    pub course_repo: Arc<dyn CourseRepository>,
    pub coupon_repo: Arc<dyn CouponRepository>,
    pub enrollment_repo: Arc<dyn EnrollmentRepository>,
    pub coupon_service: Arc<CouponService>,
    pub checkout_service: Arc<CheckoutService>,
    pub session_store: Arc<SessionStore>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        limiter: Arc<dyn RateLimiter>,
        policy: CheckoutPolicy,
    ) -> Self {
        let user_repo: Arc<dyn UserRepository> =
            Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let course_repo: Arc<dyn CourseRepository> =
            Arc::new(SqliteCourseRepository::new(db_pool.clone()));
        let coupon_repo: Arc<dyn CouponRepository> =
            Arc::new(SqliteCouponRepository::new(db_pool.clone()));
        let enrollment_repo: Arc<dyn EnrollmentRepository> =
            Arc::new(SqliteEnrollmentRepository::new(db_pool.clone()));

        let coupon_service = Arc::new(CouponService::new(
            db_pool.clone(),
            coupon_repo.clone(),
            course_repo.clone(),
        ));
        let checkout_service = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway,
            limiter,
            policy,
        ));
        let session_store = Arc::new(SessionStore::new(db_pool.clone()));

        Self {
            user_repo,
            course_repo,
            coupon_repo,
            enrollment_repo,
            coupon_service,
            checkout_service,
            session_store,
            db_pool,
        }
    }
}
