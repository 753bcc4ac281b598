use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Enrollment, EnrollmentStatus},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct EnrollmentDto {
    id: Uuid,
    course_id: Uuid,
    status: EnrollmentStatus,
    gross_cents: i64,
    created_at: String,
}

impl From<Enrollment> for EnrollmentDto {
    fn from(enrollment: Enrollment) -> Self {
        Self {
            id: enrollment.id,
            course_id: enrollment.course_id,
            status: enrollment.status,
            gross_cents: enrollment.gross_cents,
            created_at: enrollment.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    enrollments: Vec<EnrollmentDto>,
}

pub async fn list_mine(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ListResponse>> {
    let enrollments = state
        .service_context
        .enrollment_repo
        .list_by_user(current_user.user.id)
        .await?;

    Ok(Json(ListResponse {
        enrollments: enrollments.into_iter().map(Into::into).collect(),
    }))
}
