pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppResult;
use models::{
    BalanceFilter, FinancialOverview, PayoutRecord, SellerBalance, SellerBalanceRow,
    SettlementCredit,
};

pub use memory::MemorySellerLedger;
pub use repository::PgSellerLedger;

/// The seller balance ledger. All balance mutations are atomic field-level
/// increments at the storage layer - never read-modify-write in application
/// memory - because settlement for one seller can be triggered by several
/// in-flight checkouts at once.
#[async_trait]
pub trait SellerLedger: Send + Sync {
    /// Upsert the seller's balance row and apply the settlement increments
    /// in a single statement.
    async fn credit(&self, seller_id: Uuid, credit: SettlementCredit)
        -> AppResult<SellerBalance>;

    /// Move matured funds from pending to available. The sum of the two
    /// fields is invariant across this call. Fails with InsufficientBalance
    /// when pending_balance < amount.
    async fn move_to_available(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()>;

    /// Withdraw from available_balance. Fails with InsufficientBalance when
    /// available_balance < amount at the moment of the guarded update.
    async fn debit(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()>;

    async fn get(&self, seller_id: Uuid) -> AppResult<Option<SellerBalance>>;

    /// Paginated ledger view for the admin surface. Returns the page and
    /// the unpaginated match count.
    async fn list(&self, filter: &BalanceFilter) -> AppResult<(Vec<SellerBalanceRow>, i64)>;

    /// Platform-wide aggregates. `since` bounds the payout figures; balance
    /// figures are point-in-time.
    async fn overview(&self, since: Option<DateTime<Utc>>) -> AppResult<FinancialOverview>;

    // Payout record log. Records are addressed by id; a partial uniqueness
    // rule allows at most one non-terminal record per seller.

    /// Insert a new Requested record. Fails with TransferInFlight when a
    /// non-terminal record already exists for the seller.
    async fn insert_payout(
        &self,
        seller_id: Uuid,
        amount: Decimal,
        notes: Option<String>,
    ) -> AppResult<PayoutRecord>;

    async fn find_payout(&self, payout_id: Uuid) -> AppResult<Option<PayoutRecord>>;

    /// The seller's unique open TransferCompleted record, if any
    async fn open_transfer_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>>;

    /// The seller's unique non-terminal record in either open state, if any
    async fn open_payout_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>>;

    /// Requested -> TransferCompleted, recording the rail's transfer id.
    /// Guarded compare-and-set; fails with InvalidState if the record moved.
    async fn mark_transfer_completed(
        &self,
        record_id: Uuid,
        transfer_id: &str,
    ) -> AppResult<PayoutRecord>;

    /// TransferCompleted -> PayoutCompleted, recording the rail's payout id
    /// and the payout-step idempotency key.
    async fn mark_payout_completed(
        &self,
        record_id: Uuid,
        payout_id: &str,
        payout_key: &str,
        processed_at: DateTime<Utc>,
    ) -> AppResult<PayoutRecord>;

    /// Any non-terminal state -> Failed, with a reason appended to notes
    async fn mark_payout_failed(&self, record_id: Uuid, reason: &str) -> AppResult<()>;

    /// Append an operator note to a record. Notes are the one field that
    /// stays mutable after a record reaches a terminal state.
    async fn append_notes(&self, record_id: Uuid, note: &str) -> AppResult<()>;

    /// Payout history for one seller, newest first
    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<PayoutRecord>>;
}
