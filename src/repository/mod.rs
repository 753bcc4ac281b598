use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod coupon_repository;
pub mod course_repository;
pub mod enrollment_repository;
pub mod user_repository;

pub use coupon_repository::SqliteCouponRepository;
pub use course_repository::SqliteCourseRepository;
pub use enrollment_repository::SqliteEnrollmentRepository;
pub use user_repository::SqliteUserRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: CreateUserRequest) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn create(&self, course: CreateCourseRequest) -> Result<Course>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Course>>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Course>>;
    async fn list_published(&self, limit: i64, offset: i64) -> Result<Vec<Course>>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    async fn create(&self, coupon: CreateCouponRequest) -> Result<Coupon>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Coupon>>;
    async fn find_by_code(&self, normalized_code: &str) -> Result<Option<Coupon>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Coupon>>;
    async fn link_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()>;
    async fn unlink_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()>;
    async fn linked_course_ids(&self, coupon_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Read side of enrollments. All writes happen inside the checkout
/// service's transactions; handing out a mutating API here would invite
/// writes that bypass the state machine.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Enrollment>>;
    async fn find_by_pair(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>>;
}
