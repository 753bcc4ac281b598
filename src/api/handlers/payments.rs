use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{api::state::AppState, error::Result, service::SettlementStatus};

/// Settlement callback from the payment gateway. Unauthenticated by design;
/// trust comes from the HMAC signature over the query params. Safe to
/// deliver more than once.
pub async fn gateway_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>> {
    let status = state
        .service_context
        .checkout_service
        .settle(&params)
        .await?;

    let message = match status {
        SettlementStatus::Completed => "Payment confirmed, enrollment activated",
        SettlementStatus::Cancelled => "Payment failed, enrollment cancelled",
        SettlementStatus::AlreadyProcessed => "Settlement already processed",
    };

    Ok(Json(json!({
        "status": status,
        "message": message,
    })))
}
