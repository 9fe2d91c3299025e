pub mod memory;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::StoreType;

pub use memory::MemoryStoreRepository;
pub use repository::PgStoreRepository;

/// Store record, limited to the fields the settlement engine owns.
/// Catalog and application CRUD live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub store_type: StoreType,
    pub is_active: bool,
    /// Connected account on the payment rail; None until onboarding
    pub payment_account_id: Option<String>,
    pub grace_period_start: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Gates at most one warning email per grace period
    pub grace_period_notification_sent: bool,
    /// False -> true exactly once, irreversibly
    pub platform_fees_active: bool,
}

impl Store {
    pub fn has_grace_period(&self) -> bool {
        self.grace_period_start.is_some() && self.grace_period_end.is_some()
    }
}

#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn get(&self, store_id: Uuid) -> AppResult<Option<Store>>;

    /// Active stores with a configured grace window (scheduler input)
    async fn active_with_grace_period(&self) -> AppResult<Vec<Store>>;

    /// Set the grace window and reset both idempotency flags. Called once
    /// at store activation.
    async fn initialize_grace_period(
        &self,
        store_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Store>;

    /// Compare-and-set: notification_sent false -> true. Returns whether
    /// this call flipped the flag (false means another run already did).
    async fn mark_notification_sent(&self, store_id: Uuid) -> AppResult<bool>;

    /// Explicit re-arm used only by the forced-resend override
    async fn reset_notification_flag(&self, store_id: Uuid) -> AppResult<()>;

    /// Compare-and-set: platform_fees_active false -> true. Returns whether
    /// this call performed the flip; at-most-once even under concurrent
    /// runs.
    async fn activate_fees(&self, store_id: Uuid) -> AppResult<bool>;

    async fn set_payment_account(&self, store_id: Uuid, account_id: &str) -> AppResult<()>;
}
