//! Inventory ledger endpoints, reserved for internal services.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use common::ProductId;
use inventory::{InventoryItem, InventoryRecord, ItemResult};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{ReqId, ServiceCaller};
use crate::routes::Success;

#[derive(Debug, Deserialize)]
pub struct ItemsRequest {
    pub items: Vec<InventoryItem>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse<S> {
    pub results: Vec<ItemResult<S>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRequest {
    pub stock_quantity: u32,
}

/// POST /inventory/reserve
#[tracing::instrument(skip_all, fields(service = %caller.0.service, request_id = %request_id.0))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    caller: ServiceCaller,
    request_id: ReqId,
    payload: Result<Json<ItemsRequest>, JsonRejection>,
) -> Result<Success<ResultsResponse<inventory::ReserveStatus>>, ApiError> {
    let Json(req) = payload?;
    let results = state.ledger.reserve(&req.items, &request_id.0).await?;
    Ok(Success::ok(ResultsResponse { results }))
}

/// POST /inventory/release
#[tracing::instrument(skip_all, fields(service = %caller.0.service, request_id = %request_id.0))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    caller: ServiceCaller,
    request_id: ReqId,
    payload: Result<Json<ItemsRequest>, JsonRejection>,
) -> Result<Success<ResultsResponse<inventory::ReleaseStatus>>, ApiError> {
    let Json(req) = payload?;
    let results = state.ledger.release(&req.items, &request_id.0).await?;
    Ok(Success::ok(ResultsResponse { results }))
}

/// POST /inventory/deduct
#[tracing::instrument(skip_all, fields(service = %caller.0.service, request_id = %request_id.0))]
pub async fn deduct(
    State(state): State<Arc<AppState>>,
    caller: ServiceCaller,
    request_id: ReqId,
    payload: Result<Json<ItemsRequest>, JsonRejection>,
) -> Result<Success<ResultsResponse<inventory::DeductStatus>>, ApiError> {
    let Json(req) = payload?;
    let results = state.ledger.deduct(&req.items, &request_id.0).await?;
    Ok(Success::ok(ResultsResponse { results }))
}

/// GET /inventory/{productId}
pub async fn get(
    State(state): State<Arc<AppState>>,
    _caller: ServiceCaller,
    path: Result<Path<String>, PathRejection>,
) -> Result<Success<InventoryRecord>, ApiError> {
    let Path(product_id) = path?;
    let product_id = ProductId::new(product_id);
    state
        .ledger
        .get(&product_id)
        .await?
        .map(Success::ok)
        .ok_or_else(|| ApiError::not_found(format!("Inventory for {product_id} not found")))
}

/// PUT /inventory/{productId}: creates or restocks a product.
#[tracing::instrument(skip_all, fields(service = %caller.0.service))]
pub async fn set_stock(
    State(state): State<Arc<AppState>>,
    caller: ServiceCaller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<StockRequest>, JsonRejection>,
) -> Result<Success<InventoryRecord>, ApiError> {
    let Path(product_id) = path?;
    let Json(req) = payload?;
    let record = state
        .ledger
        .set_stock(&ProductId::new(product_id), req.stock_quantity)
        .await?;
    tracing::info!(
        product_id = %record.product_id,
        stock = record.stock_quantity,
        "Stock updated"
    );
    Ok(Success::ok(record))
}
