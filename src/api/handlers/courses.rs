use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::Course,
    error::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct CourseDto {
    id: Uuid,
    title: String,
    slug: String,
    description: String,
    price_cents: i64,
}

impl From<Course> for CourseDto {
    fn from(course: Course) -> Self {
        Self {
            id: course.id,
            title: course.title,
            slug: course.slug,
            description: course.description,
            price_cents: course.price_cents,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    courses: Vec<CourseDto>,
    total: usize,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>> {
    let courses = state
        .service_context
        .course_repo
        .list_published(params.limit, params.offset)
        .await?;

    let total = courses.len();
    let courses: Vec<CourseDto> = courses.into_iter().map(Into::into).collect();

    Ok(Json(ListResponse { courses, total }))
}

pub async fn get_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CourseDto>> {
    let course = state
        .service_context
        .course_repo
        .find_by_slug(&slug)
        .await?
        .filter(|c| c.published)
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

    Ok(Json(course.into()))
}
