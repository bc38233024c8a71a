// =============================================================================
// ERROR MODULE
// =============================================================================
// Service error taxonomy and its HTTP mapping.
//
// ERROR HANDLING PHILOSOPHY:
// - Invalid input and business conflicts are detected by the component that
//   owns the invariant and carry enough detail for the client to act on
// - Persistence failures roll back the transaction, are logged, and reach
//   the client only as a generic message
// =============================================================================

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ErrorResponse, OrderStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // CLIENT ERRORS
    // -------------------------------------------------------------------------
    /// Missing or malformed request fields
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Cart, order, product or sale absent (or owned by someone else)
    #[error("Not found: {0}")]
    NotFound(String),

    /// No identity supplied by the gateway
    #[error("Authentication required")]
    Unauthenticated,

    /// Identity present but not allowed to perform the action
    #[error("Not allowed: {0}")]
    Unauthorized(String),

    // -------------------------------------------------------------------------
    // BUSINESS CONFLICTS
    // -------------------------------------------------------------------------
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },

    /// Product missing from the catalog or deactivated by its merchant
    #[error("Product {product_id} is not available")]
    ProductUnavailable { product_id: Uuid },

    #[error("Order {order_id} cannot be cancelled while {status}")]
    InvalidState { order_id: Uuid, status: OrderStatus },

    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Flash sale {0} is currently active")]
    SaleActive(Uuid),

    // -------------------------------------------------------------------------
    // INTERNAL ERRORS
    // -------------------------------------------------------------------------
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AppError::Unauthorized(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::InsufficientStock { .. } => (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK"),
            AppError::ProductUnavailable { .. } => {
                (StatusCode::BAD_REQUEST, "PRODUCT_UNAVAILABLE")
            }
            AppError::InvalidState { .. } => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
            AppError::InvalidTransition { .. } => (StatusCode::BAD_REQUEST, "INVALID_TRANSITION"),
            AppError::SaleActive(_) => (StatusCode::BAD_REQUEST, "SALE_ACTIVE"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        self.status_and_code().0
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InsufficientStock {
                product_id,
                available,
                requested,
            } => Some(json!({
                "product_id": product_id,
                "available": available,
                "requested": requested,
            })),
            AppError::ProductUnavailable { product_id } => {
                Some(json!({ "product_id": product_id }))
            }
            AppError::InvalidState { order_id, status } => Some(json!({
                "order_id": order_id,
                "status": status,
            })),
            AppError::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            AppError::SaleActive(id) => Some(json!({ "flash_sale_id": id })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        // Internal details stay in the logs
        let message = match &self {
            AppError::Store(_) | AppError::Internal(_) => {
                tracing::error!(error_code, error = %self, "Request failed");
                "An internal error occurred".to_string()
            }
            _ => {
                tracing::debug!(error_code, error = %self, "Request rejected");
                self.to_string()
            }
        };

        let body = match self.details() {
            Some(details) => ErrorResponse::with_details(error_code, message, details),
            None => ErrorResponse::new(error_code, message),
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

/// JSON body extractor whose decode failures surface as `INVALID_INPUT`
/// instead of axum's plain-text 422.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_map_to_bad_request() {
        let err = AppError::InsufficientStock {
            product_id: Uuid::nil(),
            available: 0,
            requested: 1,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::InvalidState {
                order_id: Uuid::nil(),
                status: OrderStatus::Shipped
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn insufficient_stock_names_product_and_available() {
        let product_id = Uuid::new_v4();
        let details = AppError::InsufficientStock {
            product_id,
            available: 2,
            requested: 5,
        }
        .details()
        .expect("details present");

        assert_eq!(details["product_id"], json!(product_id));
        assert_eq!(details["available"], 2);
    }

    #[test]
    fn cancellation_failure_states_current_status() {
        let err = AppError::InvalidState {
            order_id: Uuid::nil(),
            status: OrderStatus::Shipped,
        };
        assert!(err.to_string().contains("shipped"));
    }
}
