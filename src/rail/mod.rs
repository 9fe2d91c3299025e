pub mod http;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppResult, RailError};
use crate::payout::models::PayoutStep;

pub use http::HttpPaymentRail;

/// Metadata attached to every rail call, used for reconciliation on the
/// rail's side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailMetadata {
    pub seller_id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub step: &'static str,
}

impl RailMetadata {
    pub fn marketplace_payout(seller_id: Uuid, step: PayoutStep) -> Self {
        Self {
            seller_id,
            kind: "marketplace_payout",
            step: step.as_str(),
        }
    }
}

/// Move funds into the platform-held intermediary state
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Minor currency units (cents)
    pub amount_minor: i64,
    pub currency: String,
    pub destination_account_id: String,
    pub metadata: RailMetadata,
    pub idempotency_key: String,
}

/// Disburse from the seller's sub-account to their bank
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub on_behalf_of_account_id: String,
    pub metadata: RailMetadata,
    pub idempotency_key: String,
}

/// Narrow seam over the external payment rail (a Stripe Connect
/// equivalent). The orchestrator and its state machine are testable
/// without network access behind this trait.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn create_connected_account(&self, email: &str) -> AppResult<String>;

    async fn create_onboarding_link(&self, account_id: &str) -> AppResult<String>;

    /// Returns the rail's transfer identifier
    async fn create_transfer(&self, request: TransferRequest) -> Result<String, RailError>;

    /// Returns the rail's payout identifier. Once this call has been
    /// issued the operation is external and cannot be aborted.
    async fn create_payout(&self, request: PayoutRequest) -> Result<String, RailError>;
}
