//! API error types with HTTP response mapping.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use inventory::InventoryError;
use saga::SagaError;
use serde::Serialize;

/// Message sent in place of internal details.
const GENERIC_MESSAGE: &str = "An internal error occurred";

/// Error response with a stable machine-readable code.
///
/// Rendered as `{"success": false, "error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorBody<'a>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "DEPENDENCY_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // The request span carries the request id.
        let message = if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
            match self.code {
                "DEPENDENCY_ERROR" => "A downstream service is unavailable",
                _ => GENERIC_MESSAGE,
            }
        } else {
            self.message.as_str()
        };

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code,
                message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        let message = err.to_string();
        match err {
            SagaError::Validation(_) => Self::validation(message),
            SagaError::InvalidProducts(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_PRODUCTS", message)
            }
            SagaError::InsufficientStock(_) => {
                Self::new(StatusCode::CONFLICT, "INSUFFICIENT_STOCK", message)
            }
            SagaError::NotFound(_) => Self::not_found(message),
            SagaError::AlreadyPaid => Self::new(StatusCode::CONFLICT, "ALREADY_PAID", message),
            SagaError::InvalidState(_) => {
                Self::new(StatusCode::CONFLICT, "INVALID_STATE", message)
            }
            SagaError::Dependency(_) => Self::dependency(message),
            SagaError::CreateFailed(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "CREATE_FAILED", message)
            }
            SagaError::Inventory(inner) => inner.into(),
            SagaError::Domain(inner) => inner.into(),
            SagaError::EventLog(_)
            | SagaError::Database(_)
            | SagaError::Migration(_)
            | SagaError::Serialization(_) => Self::internal(message),
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        let message = err.to_string();
        match err {
            InventoryError::Validation(_) => Self::validation(message),
            InventoryError::StockBelowReserved { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_STATE", message)
            }
            InventoryError::Transport(_) | InventoryError::Remote { .. } => {
                Self::dependency(message)
            }
            InventoryError::Database(_)
            | InventoryError::Migration(_)
            | InventoryError::Token(_) => Self::internal(message),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let message = err.to_string();
        match err {
            DomainError::NoItems
            | DomainError::InvalidQuantity { .. }
            | DomainError::InvalidAmount(_) => Self::validation(message),
            DomainError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_STATE", message)
            }
            DomainError::UnknownStatus(_)
            | DomainError::MissingField(_)
            | DomainError::InvalidField { .. }
            | DomainError::UnknownEventType(_) => Self::internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use common::ProductId;

    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn saga_errors_map_to_codes() {
        let cases = [
            (SagaError::Validation("x".into()), 400, "VALIDATION_ERROR"),
            (
                SagaError::InvalidProducts(vec![ProductId::new("SKU-9")]),
                400,
                "INVALID_PRODUCTS",
            ),
            (
                SagaError::InsufficientStock(vec![ProductId::new("SKU-1")]),
                409,
                "INSUFFICIENT_STOCK",
            ),
            (SagaError::NotFound("Order".into()), 404, "NOT_FOUND"),
            (SagaError::AlreadyPaid, 409, "ALREADY_PAID"),
            (SagaError::InvalidState("failed".into()), 409, "INVALID_STATE"),
            (SagaError::Dependency("timeout".into()), 502, "DEPENDENCY_ERROR"),
            (SagaError::CreateFailed("db".into()), 500, "CREATE_FAILED"),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status().as_u16(), status, "{code}");
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn remote_ledger_failures_are_dependency_errors() {
        let err = SagaError::Inventory(InventoryError::Remote {
            status: 503,
            message: "down".into(),
        });
        assert_eq!(ApiError::from(err).code(), "DEPENDENCY_ERROR");
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let (status, json) = body_json(ApiError::not_found("Order not found")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Order not found");
    }

    #[tokio::test]
    async fn internal_messages_are_hidden() {
        let (status, json) =
            body_json(SagaError::CreateFailed("relation orders does not exist".into()).into())
                .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "CREATE_FAILED");
        assert_eq!(json["error"]["message"], GENERIC_MESSAGE);
    }
}
