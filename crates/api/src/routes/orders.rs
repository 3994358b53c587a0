//! Order placement and owner-scoped reads.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use common::{AddressId, OrderId};
use domain::Order;
use inventory::InventoryItem;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Caller, ReqId};
use crate::routes::Success;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<InventoryItem>,
    pub address_id: AddressId,
}

// -- Handlers --

/// POST /orders: reserves stock and places a pending order.
#[tracing::instrument(skip_all, fields(user_id = %caller.0.user_id, request_id = %request_id.0))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    request_id: ReqId,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Success<Order>, ApiError> {
    let Json(req) = payload?;
    let order = state
        .coordinator
        .create_order(&caller.0, req.address_id, req.items, &request_id.0)
        .await?;
    Ok(Success::created(order))
}

/// GET /orders: the caller's own orders, newest first.
#[tracing::instrument(skip_all, fields(user_id = %caller.0.user_id))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Success<Vec<Order>>, ApiError> {
    let orders = state.coordinator.list_orders(&caller.0).await?;
    Ok(Success::ok(orders))
}

/// GET /orders/{id}
#[tracing::instrument(skip_all, fields(user_id = %caller.0.user_id))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> Result<Success<Order>, ApiError> {
    let Path(id) = path?;
    let order_id = parse_order_id(&id)?;
    let order = state.coordinator.get_order(order_id, &caller.0).await?;
    Ok(Success::ok(order))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::validation(format!("Invalid order id: {e}")))
}
