use std::net::IpAddr;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::CouponValidation,
    error::Result,
    service::CheckoutOutcome,
};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub course_id: Uuid,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub course_id: Uuid,
    pub coupon_code: String,
}

/// Advisory coupon check for the purchase page. The authoritative check
/// re-runs inside the purchase transaction.
pub async fn preview(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<CouponValidation>> {
    let validation = state
        .service_context
        .coupon_service
        .preview(current_user.user.id, request.course_id, &request.coupon_code)
        .await?;

    Ok(Json(validation))
}

pub async fn purchase(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutOutcome>> {
    let outcome = state
        .service_context
        .checkout_service
        .purchase(
            current_user.user.id,
            request.course_id,
            request.coupon_code.as_deref(),
            client_ip(&headers),
        )
        .await?;

    Ok(Json(outcome))
}

/// Best-effort client address for the gateway redirect. Behind a proxy the
/// first X-Forwarded-For hop is the caller.
fn client_ip(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}
