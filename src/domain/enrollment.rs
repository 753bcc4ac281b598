use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user's purchase (or purchase attempt) of one course. Unique per
/// (user, course); a `Paid` row is never deleted or repriced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    /// Amount charged to the buyer after discount.
    pub gross_cents: i64,
    /// Platform's cut, fixed at commit time.
    pub fee_cents: i64,
    /// gross - fee; what the course owner nets.
    pub net_cents: i64,
    pub coupon_id: Option<Uuid>,
    /// Gateway-side transaction reference, set on settlement.
    pub gateway_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "TEXT")]
pub enum EnrollmentStatus {
    Pending,
    Paid,
    Cancelled,
}

impl EnrollmentStatus {
    /// Terminal rows only ever change through an out-of-band correction,
    /// never through purchase or settlement entry points.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Paid | EnrollmentStatus::Cancelled)
    }
}
