use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreRepository};
use crate::error::{AppError, AppResult};
use crate::ledger::models::StoreType;

/// In-memory store repository for unit tests and local demos
pub struct MemoryStoreRepository {
    stores: RwLock<HashMap<Uuid, Store>>,
}

impl MemoryStoreRepository {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, store: Store) {
        self.stores.write().await.insert(store.id, store);
    }

    /// Convenience constructor for tests
    pub fn store(id: Uuid, name: &str) -> Store {
        Store {
            id,
            name: name.to_string(),
            email: format!("{}@stores.test", name),
            store_type: StoreType::Retailer,
            is_active: true,
            payment_account_id: Some(format!("acct_{}", name)),
            grace_period_start: None,
            grace_period_end: None,
            grace_period_notification_sent: false,
            platform_fees_active: false,
        }
    }
}

impl Default for MemoryStoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreRepository for MemoryStoreRepository {
    async fn get(&self, store_id: Uuid) -> AppResult<Option<Store>> {
        Ok(self.stores.read().await.get(&store_id).cloned())
    }

    async fn active_with_grace_period(&self) -> AppResult<Vec<Store>> {
        let mut stores: Vec<Store> = self
            .stores
            .read()
            .await
            .values()
            .filter(|s| s.is_active && s.has_grace_period())
            .cloned()
            .collect();
        stores.sort_by_key(|s| s.grace_period_end);
        Ok(stores)
    }

    async fn initialize_grace_period(
        &self,
        store_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Store> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        store.grace_period_start = Some(start);
        store.grace_period_end = Some(end);
        store.grace_period_notification_sent = false;
        store.platform_fees_active = false;
        Ok(store.clone())
    }

    async fn mark_notification_sent(&self, store_id: Uuid) -> AppResult<bool> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        if store.grace_period_notification_sent {
            return Ok(false);
        }
        store.grace_period_notification_sent = true;
        Ok(true)
    }

    async fn reset_notification_flag(&self, store_id: Uuid) -> AppResult<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;
        store.grace_period_notification_sent = false;
        Ok(())
    }

    async fn activate_fees(&self, store_id: Uuid) -> AppResult<bool> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        if store.platform_fees_active {
            return Ok(false);
        }
        store.platform_fees_active = true;
        Ok(true)
    }

    async fn set_payment_account(&self, store_id: Uuid, account_id: &str) -> AppResult<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;
        store.payment_account_id = Some(account_id.to_string());
        Ok(())
    }
}
