use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Course, CreateCourseRequest},
    error::{AppError, Result},
    repository::CourseRepository,
};

#[derive(FromRow)]
struct CourseRow {
    id: String,
    title: String,
    slug: String,
    description: String,
    price_cents: i64,
    published: bool,
    owner_id: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn row_to_course(row: CourseRow) -> Result<Course> {
    Ok(Course {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        title: row.title,
        slug: row.slug,
        description: row.description,
        price_cents: row.price_cents,
        published: row.published,
        owner_id: Uuid::parse_str(&row.owner_id).map_err(|e| AppError::Database(e.to_string()))?,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
    })
}

/// Connection-level lookup used by the checkout service to re-read the
/// course (and its price) inside the purchase transaction.
pub(crate) async fn find_by_id_on(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<Course>> {
    let row = sqlx::query_as::<_, CourseRow>(
        r#"
        SELECT id, title, slug, description, price_cents, published,
               owner_id, created_at, updated_at
        FROM courses
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    match row {
        Some(r) => Ok(Some(row_to_course(r)?)),
        None => Ok(None),
    }
}

pub struct SqliteCourseRepository {
    pool: SqlitePool,
}

impl SqliteCourseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseRepository for SqliteCourseRepository {
    async fn create(&self, course: CreateCourseRequest) -> Result<Course> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let owner_id_str = course.owner_id.to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO courses (
                id, title, slug, description, price_cents, published,
                owner_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id_str)
        .bind(&course.title)
        .bind(&course.slug)
        .bind(&course.description)
        .bind(course.price_cents)
        .bind(course.published)
        .bind(&owner_id_str)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created course".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Course>> {
        let id_str = id.to_string();
        let row = sqlx::query_as::<_, CourseRow>(
            r#"
            SELECT id, title, slug, description, price_cents, published,
                   owner_id, created_at, updated_at
            FROM courses
            WHERE id = ?
            "#,
        )
        .bind(id_str)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(row_to_course(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            r#"
            SELECT id, title, slug, description, price_cents, published,
                   owner_id, created_at, updated_at
            FROM courses
            WHERE slug = ?
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(row_to_course(r)?)),
            None => Ok(None),
        }
    }

    async fn list_published(&self, limit: i64, offset: i64) -> Result<Vec<Course>> {
        let rows = sqlx::query_as::<_, CourseRow>(
            r#"
            SELECT id, title, slug, description, price_cents, published,
                   owner_id, created_at, updated_at
            FROM courses
            WHERE published = 1
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_course).collect()
    }
}
