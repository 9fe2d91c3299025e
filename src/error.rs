use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::payout::models::PayoutStep;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Fee calculation error: {0}")]
    Fee(#[from] FeeError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("External service error: {0}")]
    ExternalService(#[from] RailError),

    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: String, available: String },
}

/// Fee-calculation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeeError {
    #[error("Invalid amount for {field}: {value}")]
    InvalidAmount { field: &'static str, value: String },

    #[error("Empty suborder list")]
    NoSuborders,
}

/// Payout state-machine errors (validation side - no external call was made)
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Payout not found: {0}")]
    NotFound(String),

    #[error("No connected payment account for seller {0}")]
    NoPaymentAccount(String),

    #[error("No completed transfer found for this seller")]
    NoCompletedTransfer,

    #[error("A payout is already in flight for seller {0}")]
    TransferInFlight(String),

    #[error("Payout in invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },
}

/// Whether an external call is known to have taken effect. `NotApplied`
/// means the request never reached the rail and a plain retry is safe;
/// `Unknown` means the operator must reconcile via the idempotency key
/// before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RailEffect {
    NotApplied,
    Unknown,
}

/// Payment-rail errors. Carries seller, step, and idempotency key so an
/// operator can distinguish "retry" from "reconcile first".
#[derive(Error, Debug)]
pub enum RailError {
    #[error("Payment rail rejected {step} for seller {seller_id}: {message}")]
    Rejected {
        seller_id: String,
        step: PayoutStep,
        message: String,
    },

    #[error("Payment rail {step} for seller {seller_id} failed ({effect:?}): {message}")]
    Failed {
        seller_id: String,
        step: PayoutStep,
        idempotency_key: String,
        effect: RailEffect,
        message: String,
    },

    #[error("Payment rail account operation failed: {0}")]
    Account(String),
}

impl RailError {
    pub fn effect(&self) -> RailEffect {
        match self {
            RailError::Rejected { .. } => RailEffect::NotApplied,
            RailError::Failed { effect, .. } => *effect,
            RailError::Account(_) => RailEffect::NotApplied,
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::InsufficientBalance { requested, available } => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Insufficient available balance".to_string(),
                Some(serde_json::json!({
                    "requested": requested,
                    "available": available,
                })),
            ),
            AppError::Fee(FeeError::InvalidAmount { field, value }) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                format!("Invalid amount for {}: {}", field, value),
                Some(serde_json::json!({ "field": field })),
            ),
            AppError::Fee(FeeError::NoSuborders) => (
                StatusCode::BAD_REQUEST,
                "NO_SUBORDERS",
                "Order contains no suborders".to_string(),
                None,
            ),
            AppError::Payout(PayoutError::NoPaymentAccount(seller_id)) => (
                StatusCode::BAD_REQUEST,
                "NO_PAYMENT_ACCOUNT",
                "No connected payment account for this seller".to_string(),
                Some(serde_json::json!({ "seller_id": seller_id })),
            ),
            AppError::Payout(PayoutError::NoCompletedTransfer) => (
                StatusCode::NOT_FOUND,
                "NO_COMPLETED_TRANSFER",
                "No completed transfer found for this seller".to_string(),
                None,
            ),
            AppError::Payout(PayoutError::TransferInFlight(seller_id)) => (
                StatusCode::CONFLICT,
                "TRANSFER_IN_FLIGHT",
                "A payout is already in flight for this seller".to_string(),
                Some(serde_json::json!({ "seller_id": seller_id })),
            ),
            AppError::Payout(PayoutError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PAYOUT_NOT_FOUND",
                format!("Payout not found: {}", id),
                None,
            ),
            AppError::Payout(PayoutError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "PAYOUT_INVALID_STATE",
                format!("Payout in state {}, expected {}", current, expected),
                None,
            ),
            AppError::ExternalService(err) => {
                let retry_safe = err.effect() == RailEffect::NotApplied;
                let details = match &err {
                    RailError::Failed { seller_id, step, idempotency_key, .. } => {
                        Some(serde_json::json!({
                            "seller_id": seller_id,
                            "step": step.as_str(),
                            "idempotency_key": idempotency_key,
                            "retry_safe": retry_safe,
                        }))
                    }
                    _ => Some(serde_json::json!({ "retry_safe": retry_safe })),
                };
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_SERVICE_ERROR",
                    err.to_string(),
                    details,
                )
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
