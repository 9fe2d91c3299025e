use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::fees::FeeBreakdown;

/// Per-seller running balance. One row per seller, created lazily on first
/// credit, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerBalance {
    pub seller_id: Uuid,

    /// Cumulative gross sale value (product + tax)
    #[serde(with = "rust_decimal::serde::float")]
    pub total_sales: Decimal,

    /// Cumulative platform cut
    #[serde(with = "rust_decimal::serde::float")]
    pub commission_deducted: Decimal,

    /// Cumulative total_sales - commission_deducted
    #[serde(with = "rust_decimal::serde::float")]
    pub net_revenue: Decimal,

    /// Credited but not yet transferable
    #[serde(with = "rust_decimal::serde::float")]
    pub pending_balance: Decimal,

    /// Eligible for payout
    #[serde(with = "rust_decimal::serde::float")]
    pub available_balance: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field-level increments applied by one order settlement. Kept separate
/// from FeeBreakdown so the ledger never recomputes fee math.
#[derive(Debug, Clone, Copy)]
pub struct SettlementCredit {
    pub gross_sale: Decimal,
    pub commission: Decimal,
    pub net_revenue: Decimal,
    /// Amount entering pending_balance (what the seller will eventually
    /// be able to withdraw)
    pub pending_credit: Decimal,
}

impl From<&FeeBreakdown> for SettlementCredit {
    fn from(b: &FeeBreakdown) -> Self {
        let gross = b.product_subtotal + b.tax_amount;
        Self {
            gross_sale: gross,
            commission: b.platform_commission,
            net_revenue: gross - b.platform_commission,
            pending_credit: b.seller_receives,
        }
    }
}

/// Payout lifecycle. Requested -> TransferCompleted -> PayoutCompleted,
/// Failed terminal from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Requested,
    TransferCompleted,
    PayoutCompleted,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Requested => "requested",
            PayoutStatus::TransferCompleted => "transfer_completed",
            PayoutStatus::PayoutCompleted => "payout_completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::PayoutCompleted | PayoutStatus::Failed)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payout attempt. Addressed by id, never by position in a list.
/// Immutable once payout_completed, except for notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub id: Uuid,
    pub seller_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: PayoutStatus,
    /// Rail identifier from the transfer step
    pub transfer_id: Option<String>,
    /// Rail identifier from the payout step
    pub payout_id: Option<String>,
    pub transfer_key: String,
    pub payout_key: Option<String>,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PayoutRecord {
    /// Idempotency key for the transfer step, derived from the record
    /// identity so a retry reuses the same key
    pub fn derive_transfer_key(seller_id: Uuid, record_id: Uuid) -> String {
        format!("transfer:{}:{}", seller_id, record_id)
    }

    /// Idempotency key for the payout step, derived from the completed
    /// transfer
    pub fn derive_payout_key(seller_id: Uuid, transfer_id: &str) -> String {
        format!("payout:{}:{}", seller_id, transfer_id)
    }
}

/// Store type mirror of the marketplace's seller roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "store_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Manufacturer,
    Wholesaler,
    Retailer,
}

/// Sort whitelist for the seller-balances listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSortBy {
    #[default]
    AvailableBalance,
    PendingBalance,
    TotalSales,
    NetRevenue,
    UpdatedAt,
}

impl BalanceSortBy {
    /// Column name used in ORDER BY. Whitelisted here so user input never
    /// reaches SQL as a raw string.
    pub fn column(&self) -> &'static str {
        match self {
            BalanceSortBy::AvailableBalance => "available_balance",
            BalanceSortBy::PendingBalance => "pending_balance",
            BalanceSortBy::TotalSales => "total_sales",
            BalanceSortBy::NetRevenue => "net_revenue",
            BalanceSortBy::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query filter for the paginated ledger view
#[derive(Debug, Clone, Default)]
pub struct BalanceFilter {
    pub search: Option<String>,
    pub store_type: Option<StoreType>,
    pub min_balance: Option<Decimal>,
    pub max_balance: Option<Decimal>,
    pub sort_by: BalanceSortBy,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

/// One row of the admin ledger view (balance joined with store identity)
#[derive(Debug, Clone, Serialize)]
pub struct SellerBalanceRow {
    #[serde(flatten)]
    pub balance: SellerBalance,
    pub store_name: Option<String>,
    pub store_type: Option<StoreType>,
}

/// Aggregate view for GET /financial/overview
#[derive(Debug, Clone, Serialize)]
pub struct FinancialOverview {
    pub sellers: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_sales: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_commission: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_net_revenue: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pending: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_available: Decimal,
    /// Completed payout volume within the requested period
    #[serde(with = "rust_decimal::serde::float")]
    pub payout_volume: Decimal,
    pub payout_count: i64,
}
