//! HTTP client for a remote inventory ledger.

use std::time::Duration;

use async_trait::async_trait;
use common::{ProductId, RequestId, ServiceTokenSigner};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    InventoryError, Result,
    ledger::{
        DeductStatus, InventoryItem, InventoryLedger, InventoryRecord, ItemResult, ReleaseStatus,
        ReserveStatus, validate_items,
    },
};

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Serialize)]
struct ItemsRequest<'a> {
    items: &'a [InventoryItem],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StockRequest {
    stock_quantity: u32,
}

#[derive(Deserialize)]
struct ResultsBody<S> {
    results: Vec<ItemResult<S>>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Talks to a ledger exposed over HTTP by another service.
///
/// Every call carries a freshly minted service token and the caller's
/// request id, and is bounded by the configured timeout.
#[derive(Clone)]
pub struct HttpInventoryClient {
    http: reqwest::Client,
    base_url: String,
    signer: ServiceTokenSigner,
}

impl HttpInventoryClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: ServiceTokenSigner,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        request_id: &RequestId,
    ) -> Result<Option<T>> {
        let token = self.signer.issue(request_id)?;
        let response = request
            .header(SERVICE_TOKEN_HEADER, token)
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: Envelope<T> = response.json().await?;
        if !status.is_success() {
            let message = body
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| status.to_string());
            if status == reqwest::StatusCode::BAD_REQUEST {
                return Err(InventoryError::Validation(message));
            }
            return Err(InventoryError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        match body.data {
            Some(data) => Ok(Some(data)),
            None => Err(InventoryError::Remote {
                status: status.as_u16(),
                message: "response carried no data".to_string(),
            }),
        }
    }

    async fn post_items<S: DeserializeOwned>(
        &self,
        path: &str,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<S>>> {
        validate_items(items)?;

        let request = self.http.post(self.url(path)).json(&ItemsRequest { items });
        let body: Option<ResultsBody<S>> = self.send(request, request_id).await?;
        body.map(|b| b.results).ok_or_else(|| InventoryError::Remote {
            status: 404,
            message: format!("{path} not found"),
        })
    }
}

#[async_trait]
impl InventoryLedger for HttpInventoryClient {
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn reserve(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReserveStatus>>> {
        self.post_items("/inventory/reserve", items, request_id).await
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn release(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<ReleaseStatus>>> {
        self.post_items("/inventory/release", items, request_id).await
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn deduct(
        &self,
        items: &[InventoryItem],
        request_id: &RequestId,
    ) -> Result<Vec<ItemResult<DeductStatus>>> {
        self.post_items("/inventory/deduct", items, request_id).await
    }

    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        let request = self.http.get(self.url(&format!("/inventory/{product_id}")));
        self.send(request, &RequestId::generate()).await
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<InventoryRecord> {
        let request = self
            .http
            .put(self.url(&format!("/inventory/{product_id}")))
            .json(&StockRequest {
                stock_quantity: stock,
            });
        self.send(request, &RequestId::generate())
            .await?
            .ok_or_else(|| InventoryError::Remote {
                status: 404,
                message: format!("inventory for {product_id} not found"),
            })
    }
}
