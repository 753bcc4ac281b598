use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{normalize_code, Coupon, CreateCouponRequest, DiscountKind},
    error::{AppError, Result},
    repository::CouponRepository,
};

#[derive(FromRow)]
struct CouponRow {
    id: String,
    code: String,
    kind: String,
    value: i64,
    is_active: bool,
    starts_at: Option<NaiveDateTime>,
    expires_at: Option<NaiveDateTime>,
    usage_cap: Option<i64>,
    usage_count: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const COUPON_COLUMNS: &str = "id, code, kind, value, is_active, starts_at, expires_at, \
                              usage_cap, usage_count, created_at, updated_at";

fn row_to_coupon(row: CouponRow) -> Result<Coupon> {
    Ok(Coupon {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        code: row.code,
        kind: parse_kind(&row.kind)?,
        value: row.value,
        is_active: row.is_active,
        starts_at: row
            .starts_at
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        expires_at: row
            .expires_at
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        usage_cap: row.usage_cap,
        usage_count: row.usage_count,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
    })
}

fn parse_kind(s: &str) -> Result<DiscountKind> {
    match s {
        "Percent" => Ok(DiscountKind::Percent),
        "Fixed" => Ok(DiscountKind::Fixed),
        _ => Err(AppError::Database(format!("Invalid discount kind: {}", s))),
    }
}

fn kind_to_str(kind: &DiscountKind) -> &'static str {
    match kind {
        DiscountKind::Percent => "Percent",
        DiscountKind::Fixed => "Fixed",
    }
}

/// Connection-level lookup shared by the pool-backed repository and the
/// in-transaction validator, so both run the same query.
pub(crate) async fn find_by_code_on(
    conn: &mut SqliteConnection,
    normalized_code: &str,
) -> Result<Option<Coupon>> {
    let row = sqlx::query_as::<_, CouponRow>(&format!(
        "SELECT {} FROM coupons WHERE code = ?",
        COUPON_COLUMNS
    ))
    .bind(normalized_code)
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    match row {
        Some(r) => Ok(Some(row_to_coupon(r)?)),
        None => Ok(None),
    }
}

/// Whether the coupon is explicitly linked to the course. An unlinked
/// coupon applies to nothing.
pub(crate) async fn is_linked_to_course_on(
    conn: &mut SqliteConnection,
    coupon_id: Uuid,
    course_id: Uuid,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM coupon_courses WHERE coupon_id = ? AND course_id = ?",
    )
    .bind(coupon_id.to_string())
    .bind(course_id.to_string())
    .fetch_one(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(count > 0)
}

pub struct SqliteCouponRepository {
    pool: SqlitePool,
}

impl SqliteCouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponRepository for SqliteCouponRepository {
    async fn create(&self, coupon: CreateCouponRequest) -> Result<Coupon> {
        let code = normalize_code(&coupon.code)
            .ok_or_else(|| AppError::Validation("Coupon code must not be empty".to_string()))?;

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let kind_str = kind_to_str(&coupon.kind);
        let starts_at_naive = coupon.starts_at.map(|dt| dt.naive_utc());
        let expires_at_naive = coupon.expires_at.map(|dt| dt.naive_utc());
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO coupons (
                id, code, kind, value, is_active, starts_at, expires_at,
                usage_cap, usage_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id_str)
        .bind(&code)
        .bind(kind_str)
        .bind(coupon.value)
        .bind(coupon.is_active)
        .bind(starts_at_naive)
        .bind(expires_at_naive)
        .bind(coupon.usage_cap)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created coupon".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Coupon>> {
        let id_str = id.to_string();
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {} FROM coupons WHERE id = ?",
            COUPON_COLUMNS
        ))
        .bind(id_str)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(row_to_coupon(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, normalized_code: &str) -> Result<Option<Coupon>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        find_by_code_on(&mut conn, normalized_code).await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {} FROM coupons ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COUPON_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_coupon).collect()
    }

    async fn link_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO coupon_courses (coupon_id, course_id) VALUES (?, ?)",
        )
        .bind(coupon_id.to_string())
        .bind(course_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn unlink_course(&self, coupon_id: Uuid, course_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM coupon_courses WHERE coupon_id = ? AND course_id = ?")
            .bind(coupon_id.to_string())
            .bind(course_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn linked_course_ids(&self, coupon_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT course_id FROM coupon_courses WHERE coupon_id = ?")
                .bind(coupon_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        ids.iter()
            .map(|s| Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string())))
            .collect()
    }
}
