//! Request identity: request ids, user bearer tokens and service tokens.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use common::{AuthContext, RequestId, ServiceClaims, TokenError};
use tracing::Instrument;

use crate::AppState;
use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Assigns every request a [`RequestId`] and echoes it on the response.
///
/// The id is taken from `x-request-id` when present and stored as a request
/// extension for handlers. Everything logged while handling the request is
/// recorded under a span carrying it. Also records request count and
/// latency by method and status class.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();

    let request_id = header_string(request.headers(), REQUEST_ID_HEADER)
        .filter(|id| !id.is_empty())
        .map(RequestId::new)
        .unwrap_or_else(RequestId::generate);

    request.extensions_mut().insert(request_id.clone());
    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let labels = [
        ("method", method),
        ("status_class", status_class(response.status().as_u16()).to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
    response
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// The request id assigned by [`request_id`].
pub struct ReqId(pub RequestId);

impl<S: Send + Sync> FromRequestParts<S> for ReqId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::generate);
        Ok(Self(id))
    }
}

/// The end user, authenticated from `Authorization: Bearer <jwt>`.
pub struct Caller(pub AuthContext);

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authorization header required"))?;

        let auth = state.user_tokens.verify(&token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected user token");
            token_error(e)
        })?;
        Ok(Self(auth))
    }
}

/// Another internal service, authenticated from `x-service-token`.
pub struct ServiceCaller(pub ServiceClaims);

impl FromRequestParts<Arc<AppState>> for ServiceCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = header_string(&parts.headers, SERVICE_TOKEN_HEADER).unwrap_or_default();

        let claims = state.service_tokens.verify(&token).map_err(|e| {
            tracing::warn!(error = %e, "Rejected service token");
            token_error(e)
        })?;
        Ok(Self(claims))
    }
}

fn token_error(err: TokenError) -> ApiError {
    match err {
        TokenError::Missing => ApiError::unauthorized("Authentication token required"),
        TokenError::Expired => ApiError::unauthorized("Authentication token expired"),
        TokenError::Invalid(_) | TokenError::Signing(_) => {
            ApiError::unauthorized("Invalid authentication token")
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, header::AUTHORIZATION.as_str())?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub(crate) fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
