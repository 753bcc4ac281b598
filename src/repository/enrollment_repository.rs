use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Enrollment, EnrollmentStatus},
    error::{AppError, Result},
    repository::EnrollmentRepository,
};

#[derive(FromRow)]
struct EnrollmentRow {
    id: String,
    user_id: String,
    course_id: String,
    status: String,
    gross_cents: i64,
    fee_cents: i64,
    net_cents: i64,
    coupon_id: Option<String>,
    gateway_ref: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_enrollment(row: EnrollmentRow) -> Result<Enrollment> {
    Ok(Enrollment {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        user_id: Uuid::parse_str(&row.user_id).map_err(|e| AppError::Database(e.to_string()))?,
        course_id: Uuid::parse_str(&row.course_id)
            .map_err(|e| AppError::Database(e.to_string()))?,
        status: parse_status(&row.status)?,
        gross_cents: row.gross_cents,
        fee_cents: row.fee_cents,
        net_cents: row.net_cents,
        coupon_id: row
            .coupon_id
            .map(|s| Uuid::parse_str(&s).map_err(|e| AppError::Database(e.to_string())))
            .transpose()?,
        gateway_ref: row.gateway_ref,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
    })
}

pub(crate) fn parse_status(s: &str) -> Result<EnrollmentStatus> {
    match s {
        "Pending" => Ok(EnrollmentStatus::Pending),
        "Paid" => Ok(EnrollmentStatus::Paid),
        "Cancelled" => Ok(EnrollmentStatus::Cancelled),
        _ => Err(AppError::Database(format!("Invalid enrollment status: {}", s))),
    }
}

pub(crate) fn status_to_str(status: &EnrollmentStatus) -> &'static str {
    match status {
        EnrollmentStatus::Pending => "Pending",
        EnrollmentStatus::Paid => "Paid",
        EnrollmentStatus::Cancelled => "Cancelled",
    }
}

/// Connection-level lookups shared with the checkout service, which reads
/// rows from inside its own transactions.
pub(crate) async fn find_by_id_on(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<Enrollment>> {
    let row = sqlx::query_as::<_, EnrollmentRow>(
        r#"
        SELECT id, user_id, course_id, status, gross_cents, fee_cents,
               net_cents, coupon_id, gateway_ref, created_at, updated_at
        FROM enrollments
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    match row {
        Some(r) => Ok(Some(row_to_enrollment(r)?)),
        None => Ok(None),
    }
}

pub(crate) async fn find_by_pair_on(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Enrollment>> {
    let row = sqlx::query_as::<_, EnrollmentRow>(
        r#"
        SELECT id, user_id, course_id, status, gross_cents, fee_cents,
               net_cents, coupon_id, gateway_ref, created_at, updated_at
        FROM enrollments
        WHERE user_id = ? AND course_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(course_id.to_string())
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    match row {
        Some(r) => Ok(Some(row_to_enrollment(r)?)),
        None => Ok(None),
    }
}

pub struct SqliteEnrollmentRepository {
    pool: SqlitePool,
}

impl SqliteEnrollmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentRepository for SqliteEnrollmentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Enrollment>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        find_by_id_on(&mut conn, id).await
    }

    async fn find_by_pair(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        find_by_pair_on(&mut conn, user_id, course_id).await
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT id, user_id, course_id, status, gross_cents, fee_cents,
                   net_cents, coupon_id, gateway_ref, created_at, updated_at
            FROM enrollments
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_enrollment).collect()
    }
}
