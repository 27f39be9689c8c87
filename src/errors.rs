use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::payments::GatewayError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every JSON endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "EMPTY_CART",
    "message": "Cart is empty",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "EMPTY_CART")]
    pub code: String,
    /// Human-readable error description
    #[schema(example = "Cart is empty")]
    pub message: String,
    /// Additional error details (e.g. the gateway failure kind)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "GATEWAY_UNREACHABLE")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Hash error: {0}")]
    HashError(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    // Checkout and payment reconciliation
    #[error("Authentication required")]
    Unauthenticated,

    #[error("User not found")]
    UserNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Checkout transaction failed: {0}")]
    CheckoutTransactionFailed(#[source] DbErr),

    #[error("Payment initiation failed: {0}")]
    PaymentInitiationFailed(#[source] GatewayError),

    #[error("Compensation for order {order_id} failed after gateway error ({gateway_error}): {cleanup_error}")]
    CompensationFailed {
        order_id: Uuid,
        gateway_error: GatewayError,
        cleanup_error: String,
    },

    #[error("Payment reference {reference} could not be stored on order {order_id}")]
    ReferencePersistFailed { order_id: Uuid, reference: String },

    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Order status update failed: {0}")]
    StatusUpdateFailed(#[source] DbErr),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::EmptyCart
            | Self::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_)
            | Self::JwtError(_)
            | Self::Unauthenticated
            | Self::UserNotFound
            | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::HashError(_)
            | Self::CheckoutTransactionFailed(_)
            | Self::PaymentInitiationFailed(_)
            | Self::CompensationFailed { .. }
            | Self::ReferencePersistFailed { .. }
            | Self::StatusUpdateFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code carried in the error body
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::HashError(_) => "INTERNAL_ERROR",
            Self::JwtError(_) => "INVALID_TOKEN",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::EmptyCart => "EMPTY_CART",
            Self::CheckoutTransactionFailed(_) => "CHECKOUT_TRANSACTION_FAILED",
            Self::PaymentInitiationFailed(_) => "PAYMENT_INITIATION_FAILED",
            Self::CompensationFailed { .. } => "COMPENSATION_FAILED",
            Self::ReferencePersistFailed { .. } => "REFERENCE_PERSIST_FAILED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::StatusUpdateFailed(_) => "STATUS_UPDATE_FAILED",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::HashError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::CheckoutTransactionFailed(_) => {
                "Checkout could not be completed, please try again".to_string()
            }
            Self::PaymentInitiationFailed(_) => {
                "Payment could not be initiated, please try again later".to_string()
            }
            Self::CompensationFailed { order_id, .. } => format!(
                "Payment could not be initiated and order {} needs attention, please contact support",
                order_id
            ),
            Self::ReferencePersistFailed { order_id, .. } => format!(
                "Payment was created but order {} could not be updated, please contact support",
                order_id
            ),
            Self::StatusUpdateFailed(_) => "Order status could not be updated".to_string(),
            _ => self.to_string(),
        }
    }

    /// Extra detail safe to expose to the caller
    pub fn details(&self) -> Option<String> {
        match self {
            Self::PaymentInitiationFailed(gateway) => Some(gateway.code().to_string()),
            Self::CompensationFailed { gateway_error, .. } => {
                Some(gateway_error.code().to_string())
            }
            _ => None,
        }
    }

    fn to_error_response(&self) -> ErrorResponse {
        let status = self.status_code();
        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.to_error_response())).into_response();
        if matches!(self, Self::RateLimitExceeded) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ServiceError(service_error) => service_error.into_response(),
            ApiError::ValidationError(msg) => {
                let status = StatusCode::BAD_REQUEST;
                let body = ErrorResponse {
                    error: status.canonical_reason().unwrap_or("Error").to_string(),
                    code: "VALIDATION_ERROR".to_string(),
                    message: msg,
                    details: None,
                    request_id: current_request_id(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use test_case::test_case;

    async fn body_of(response: Response) -> ErrorResponse {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let payload = body_of(response).await;
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn api_validation_error_is_bad_request() {
        let response = ApiError::ValidationError("quantity must be positive".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = body_of(response).await;
        assert_eq!(payload.code, "VALIDATION_ERROR");
    }

    #[test_case(ServiceError::Unauthenticated, StatusCode::UNAUTHORIZED, "UNAUTHENTICATED")]
    #[test_case(ServiceError::UserNotFound, StatusCode::UNAUTHORIZED, "USER_NOT_FOUND")]
    #[test_case(ServiceError::EmptyCart, StatusCode::BAD_REQUEST, "EMPTY_CART")]
    #[test_case(ServiceError::CheckoutTransactionFailed(DbErr::Custom("x".into())), StatusCode::INTERNAL_SERVER_ERROR, "CHECKOUT_TRANSACTION_FAILED")]
    #[test_case(ServiceError::PaymentInitiationFailed(GatewayError::GatewayUnreachable("timeout".into())), StatusCode::INTERNAL_SERVER_ERROR, "PAYMENT_INITIATION_FAILED")]
    #[test_case(ServiceError::InvalidSignature, StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE")]
    #[test_case(ServiceError::OrderNotFound, StatusCode::NOT_FOUND, "ORDER_NOT_FOUND")]
    #[test_case(ServiceError::AmountMismatch { expected: 25000, received: 1 }, StatusCode::BAD_REQUEST, "AMOUNT_MISMATCH")]
    #[test_case(ServiceError::StatusUpdateFailed(DbErr::Custom("x".into())), StatusCode::INTERNAL_SERVER_ERROR, "STATUS_UPDATE_FAILED")]
    fn workflow_errors_map_to_status_and_code(
        error: ServiceError,
        status: StatusCode,
        code: &str,
    ) {
        assert_eq!(error.status_code(), status);
        assert_eq!(error.error_code(), code);
    }

    #[test]
    fn internal_details_are_hidden() {
        assert_eq!(
            ServiceError::HashError("salt exploded".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("relation missing".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFound("Product not found".into()).response_message(),
            "Not found: Product not found"
        );
    }

    #[tokio::test]
    async fn compensation_failure_is_distinct_from_gateway_failure() {
        let order_id = Uuid::new_v4();
        let err = ServiceError::CompensationFailed {
            order_id,
            gateway_error: GatewayError::GatewayRejected {
                code: "400".into(),
                message: "bad merchant".into(),
            },
            cleanup_error: "connection reset".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = body_of(err.into_response()).await;
        assert_eq!(payload.code, "COMPENSATION_FAILED");
        assert_eq!(payload.details.as_deref(), Some("GATEWAY_REJECTED"));
        assert!(payload.message.contains(&order_id.to_string()));
        assert!(!payload.message.contains("connection reset"));
    }

    #[tokio::test]
    async fn gateway_kind_is_exposed_as_details() {
        let err = ServiceError::PaymentInitiationFailed(GatewayError::ConsistencyError {
            order_total: 10,
            computed_total: 20,
        });
        let payload = body_of(err.into_response()).await;
        assert_eq!(payload.details.as_deref(), Some("CONSISTENCY_ERROR"));
    }
}
