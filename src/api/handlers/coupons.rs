use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Coupon, CreateCouponRequest, DiscountKind},
    error::Result,
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
pub struct CouponDto {
    id: Uuid,
    code: String,
    kind: DiscountKind,
    value: i64,
    is_active: bool,
    usage_cap: Option<i64>,
    usage_count: i64,
}

impl From<Coupon> for CouponDto {
    fn from(coupon: Coupon) -> Self {
        Self {
            id: coupon.id,
            code: coupon.code,
            kind: coupon.kind,
            value: coupon.value,
            is_active: coupon.is_active,
            usage_cap: coupon.usage_cap,
            usage_count: coupon.usage_count,
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(_admin): Extension<CurrentUser>,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<CouponDto>)> {
    let coupon = state
        .service_context
        .coupon_service
        .create_coupon(request)
        .await?;

    Ok((StatusCode::CREATED, Json(coupon.into())))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(_admin): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<CouponDto>>> {
    let coupons = state
        .service_context
        .coupon_repo
        .list(params.limit, params.offset)
        .await?;

    Ok(Json(coupons.into_iter().map(Into::into).collect()))
}

pub async fn link_course(
    State(state): State<AppState>,
    Extension(_admin): Extension<CurrentUser>,
    Path((coupon_id, course_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .service_context
        .coupon_service
        .link_course(coupon_id, course_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unlink_course(
    State(state): State<AppState>,
    Extension(_admin): Extension<CurrentUser>,
    Path((coupon_id, course_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .service_context
        .coupon_service
        .unlink_course(coupon_id, course_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
