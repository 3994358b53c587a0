//! Payment provider webhooks.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use saga::WebhookOutcome;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{ReqId, header_string};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// POST /webhooks/payment
///
/// The signature is checked against the raw body, so the body is taken as
/// bytes. Rejected deliveries get a 400; everything the gateway accepted,
/// including duplicates and ignored events, gets a 200 so the provider
/// stops retrying.
#[tracing::instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    request_id: ReqId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    let signature = header_string(&headers, &state.signature_header);
    let outcome = state
        .gateway
        .handle_webhook(&body, signature.as_deref(), &request_id.0)
        .await?;

    let status = match outcome {
        WebhookOutcome::Rejected(reason) => {
            tracing::warn!(?reason, "Webhook rejected");
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(WebhookResponse {
            status: outcome.status(),
        }),
    ))
}
