use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::fees::{MultiSellerBreakdown, SuborderInput};
use crate::ledger::models::{
    BalanceSortBy, PayoutRecord, SellerBalanceRow, SortOrder, StoreType,
};

/// GET /financial/overview
#[derive(Debug, Deserialize)]
pub struct OverviewQuery {
    pub period: Option<String>,
}

/// Parse "7d" / "30d" / "90d" / "all" into a lower time bound
pub fn parse_period(period: Option<&str>, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    match period.unwrap_or("all") {
        "all" => Ok(None),
        "7d" => Ok(Some(now - Duration::days(7))),
        "30d" => Ok(Some(now - Duration::days(30))),
        "90d" => Ok(Some(now - Duration::days(90))),
        other => Err(AppError::InvalidInput(format!(
            "Unknown period '{}': expected 7d, 30d, 90d or all",
            other
        ))),
    }
}

/// GET /financial/seller-balances
#[derive(Debug, Deserialize, Default)]
pub struct BalanceListQuery {
    pub search: Option<String>,
    pub store_type: Option<StoreType>,
    pub min_balance: Option<Decimal>,
    pub max_balance: Option<Decimal>,
    pub sort_by: Option<BalanceSortBy>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BalanceListResponse {
    pub balances: Vec<SellerBalanceRow>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// POST /financial/settle-order
#[derive(Debug, Deserialize, Validate)]
pub struct SettleOrderRequest {
    #[validate(length(min = 1, message = "order_id must not be empty"))]
    pub order_id: String,
    pub gross_up_fees: bool,
    #[validate(length(min = 1, message = "at least one suborder is required"))]
    pub suborders: Vec<SuborderInput>,
}

#[derive(Debug, Serialize)]
pub struct SettleOrderResponse {
    pub order_id: String,
    pub breakdown: MultiSellerBreakdown,
}

/// POST /financial/release-funds
#[derive(Debug, Deserialize)]
pub struct ReleaseFundsRequest {
    pub seller_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// POST /financial/transfer-funds
#[derive(Debug, Deserialize)]
pub struct TransferFundsRequest {
    pub seller_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub notes: Option<String>,
}

/// POST /financial/process-payout
#[derive(Debug, Deserialize)]
pub struct ProcessPayoutRequest {
    pub seller_id: Uuid,
    /// Explicit record address; when omitted the seller's unique open
    /// transfer is resolved
    pub payout_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    pub payout: PayoutRecord,
    pub message: String,
}

/// POST /grace-period/initialize/:store_id
#[derive(Debug, Deserialize, Default)]
pub struct InitializeGraceRequest {
    /// Defaults to now
    pub activation_date: Option<DateTime<Utc>>,
}

/// POST /grace-period/store/:store_id/send-warning
#[derive(Debug, Deserialize)]
pub struct SendWarningRequest {
    pub days_remaining: i64,
    #[serde(default)]
    pub force_notification: bool,
}

/// POST /grace-period/store/:store_id/activate-fees
#[derive(Debug, Deserialize)]
pub struct ActivateFeesRequest {
    #[serde(default = "default_true")]
    pub send_notification: bool,
}

fn default_true() -> bool {
    true
}

/// POST /sellers/:store_id/connect-account
#[derive(Debug, Deserialize, Validate)]
pub struct ConnectAccountRequest {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectAccountResponse {
    pub account_id: String,
    pub onboarding_url: String,
}
