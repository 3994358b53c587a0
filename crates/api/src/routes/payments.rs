//! Payment intents.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use saga::PaymentIntent;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Caller, ReqId};
use crate::routes::Success;
use crate::routes::orders::parse_order_id;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    pub order_id: String,
}

/// POST /payments/intent: checkout details for one of the caller's
/// pending orders.
#[tracing::instrument(skip_all, fields(user_id = %caller.0.user_id, request_id = %request_id.0))]
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    request_id: ReqId,
    payload: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Success<PaymentIntent>, ApiError> {
    let Json(req) = payload?;
    let order_id = parse_order_id(&req.order_id)?;
    let intent = state
        .gateway
        .create_payment_intent(order_id, &caller.0, &request_id.0)
        .await?;
    Ok(Success::ok(intent))
}
