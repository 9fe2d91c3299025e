use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::SellerLedger;
use crate::error::{AppError, AppResult, PayoutError};

/// In-memory seller ledger with the same guarded-mutation semantics as the
/// Postgres implementation. Used by unit tests and local demos.
pub struct MemorySellerLedger {
    balances: RwLock<HashMap<Uuid, SellerBalance>>,
    payouts: RwLock<HashMap<Uuid, PayoutRecord>>,
    /// Store identity for the listing view (name, type)
    stores: RwLock<HashMap<Uuid, (String, StoreType)>>,
}

impl MemorySellerLedger {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            payouts: RwLock::new(HashMap::new()),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_store_meta(&self, seller_id: Uuid, name: &str, store_type: StoreType) {
        self.stores
            .write()
            .await
            .insert(seller_id, (name.to_string(), store_type));
    }

    fn blank_balance(seller_id: Uuid) -> SellerBalance {
        let now = Utc::now();
        SellerBalance {
            seller_id,
            total_sales: Decimal::ZERO,
            commission_deducted: Decimal::ZERO,
            net_revenue: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for MemorySellerLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SellerLedger for MemorySellerLedger {
    async fn credit(
        &self,
        seller_id: Uuid,
        credit: SettlementCredit,
    ) -> AppResult<SellerBalance> {
        if credit.pending_credit < Decimal::ZERO || credit.gross_sale < Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Negative settlement credit for seller {}",
                seller_id
            )));
        }

        let mut balances = self.balances.write().await;
        let balance = balances
            .entry(seller_id)
            .or_insert_with(|| Self::blank_balance(seller_id));

        balance.total_sales += credit.gross_sale;
        balance.commission_deducted += credit.commission;
        balance.net_revenue += credit.net_revenue;
        balance.pending_balance += credit.pending_credit;
        balance.updated_at = Utc::now();

        Ok(balance.clone())
    }

    async fn move_to_available(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Release amount must be positive, got {}",
                amount
            )));
        }

        let mut balances = self.balances.write().await;
        let balance = balances
            .get_mut(&seller_id)
            .ok_or_else(|| AppError::NotFound(format!("seller {}", seller_id)))?;

        if balance.pending_balance < amount {
            return Err(AppError::InsufficientBalance {
                requested: amount.to_string(),
                available: balance.pending_balance.to_string(),
            });
        }

        balance.pending_balance -= amount;
        balance.available_balance += amount;
        balance.updated_at = Utc::now();
        Ok(())
    }

    async fn debit(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Debit amount must be positive, got {}",
                amount
            )));
        }

        let mut balances = self.balances.write().await;
        let balance = balances
            .get_mut(&seller_id)
            .ok_or_else(|| AppError::NotFound(format!("seller {}", seller_id)))?;

        if balance.available_balance < amount {
            return Err(AppError::InsufficientBalance {
                requested: amount.to_string(),
                available: balance.available_balance.to_string(),
            });
        }

        balance.available_balance -= amount;
        balance.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, seller_id: Uuid) -> AppResult<Option<SellerBalance>> {
        Ok(self.balances.read().await.get(&seller_id).cloned())
    }

    async fn list(&self, filter: &BalanceFilter) -> AppResult<(Vec<SellerBalanceRow>, i64)> {
        let balances = self.balances.read().await;
        let stores = self.stores.read().await;

        let mut rows: Vec<SellerBalanceRow> = balances
            .values()
            .filter(|b| {
                let meta = stores.get(&b.seller_id);
                if let Some(search) = &filter.search {
                    let needle = search.to_lowercase();
                    let hit = meta
                        .map(|(name, _)| name.to_lowercase().contains(&needle))
                        .unwrap_or(false);
                    if !hit {
                        return false;
                    }
                }
                if let Some(want) = filter.store_type {
                    if meta.map(|(_, t)| *t) != Some(want) {
                        return false;
                    }
                }
                if let Some(min) = filter.min_balance {
                    if b.available_balance < min {
                        return false;
                    }
                }
                if let Some(max) = filter.max_balance {
                    if b.available_balance > max {
                        return false;
                    }
                }
                true
            })
            .map(|b| SellerBalanceRow {
                balance: b.clone(),
                store_name: stores.get(&b.seller_id).map(|(name, _)| name.clone()),
                store_type: stores.get(&b.seller_id).map(|(_, t)| *t),
            })
            .collect();

        rows.sort_by(|a, b| {
            let key = |r: &SellerBalanceRow| match filter.sort_by {
                BalanceSortBy::AvailableBalance => r.balance.available_balance,
                BalanceSortBy::PendingBalance => r.balance.pending_balance,
                BalanceSortBy::TotalSales => r.balance.total_sales,
                BalanceSortBy::NetRevenue => r.balance.net_revenue,
                BalanceSortBy::UpdatedAt => {
                    Decimal::from(r.balance.updated_at.timestamp_millis())
                }
            };
            let ord = key(a).cmp(&key(b));
            match filter.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = rows.len() as i64;
        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.clamp(1, 200) as usize;
        let page = rows.into_iter().skip(offset).take(limit).collect();

        Ok((page, total))
    }

    async fn overview(&self, since: Option<DateTime<Utc>>) -> AppResult<FinancialOverview> {
        let balances = self.balances.read().await;
        let payouts = self.payouts.read().await;

        let mut overview = FinancialOverview {
            sellers: balances.len() as i64,
            total_sales: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            total_net_revenue: Decimal::ZERO,
            total_pending: Decimal::ZERO,
            total_available: Decimal::ZERO,
            payout_volume: Decimal::ZERO,
            payout_count: 0,
        };

        for b in balances.values() {
            overview.total_sales += b.total_sales;
            overview.total_commission += b.commission_deducted;
            overview.total_net_revenue += b.net_revenue;
            overview.total_pending += b.pending_balance;
            overview.total_available += b.available_balance;
        }

        for p in payouts.values() {
            if p.status != PayoutStatus::PayoutCompleted {
                continue;
            }
            if let Some(since) = since {
                if p.processed_at.map(|t| t < since).unwrap_or(true) {
                    continue;
                }
            }
            overview.payout_volume += p.amount;
            overview.payout_count += 1;
        }

        Ok(overview)
    }

    async fn insert_payout(
        &self,
        seller_id: Uuid,
        amount: Decimal,
        notes: Option<String>,
    ) -> AppResult<PayoutRecord> {
        let mut payouts = self.payouts.write().await;

        let in_flight = payouts
            .values()
            .any(|p| p.seller_id == seller_id && !p.status.is_terminal());
        if in_flight {
            return Err(AppError::Payout(PayoutError::TransferInFlight(
                seller_id.to_string(),
            )));
        }

        let id = Uuid::new_v4();
        let record = PayoutRecord {
            id,
            seller_id,
            amount,
            status: PayoutStatus::Requested,
            transfer_id: None,
            payout_id: None,
            transfer_key: PayoutRecord::derive_transfer_key(seller_id, id),
            payout_key: None,
            notes,
            requested_at: Utc::now(),
            processed_at: None,
        };
        payouts.insert(id, record.clone());
        Ok(record)
    }

    async fn find_payout(&self, payout_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        Ok(self.payouts.read().await.get(&payout_id).cloned())
    }

    async fn open_transfer_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        Ok(self
            .payouts
            .read()
            .await
            .values()
            .find(|p| p.seller_id == seller_id && p.status == PayoutStatus::TransferCompleted)
            .cloned())
    }

    async fn open_payout_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        Ok(self
            .payouts
            .read()
            .await
            .values()
            .find(|p| p.seller_id == seller_id && !p.status.is_terminal())
            .cloned())
    }

    async fn mark_transfer_completed(
        &self,
        record_id: Uuid,
        transfer_id: &str,
    ) -> AppResult<PayoutRecord> {
        let mut payouts = self.payouts.write().await;
        let record = payouts
            .get_mut(&record_id)
            .ok_or_else(|| AppError::Payout(PayoutError::NotFound(record_id.to_string())))?;

        if record.status != PayoutStatus::Requested {
            return Err(AppError::Payout(PayoutError::InvalidState {
                current: record.status.to_string(),
                expected: "requested".to_string(),
            }));
        }

        record.status = PayoutStatus::TransferCompleted;
        record.transfer_id = Some(transfer_id.to_string());
        Ok(record.clone())
    }

    async fn mark_payout_completed(
        &self,
        record_id: Uuid,
        payout_id: &str,
        payout_key: &str,
        processed_at: DateTime<Utc>,
    ) -> AppResult<PayoutRecord> {
        let mut payouts = self.payouts.write().await;
        let record = payouts
            .get_mut(&record_id)
            .ok_or_else(|| AppError::Payout(PayoutError::NotFound(record_id.to_string())))?;

        if record.status != PayoutStatus::TransferCompleted {
            return Err(AppError::Payout(PayoutError::InvalidState {
                current: record.status.to_string(),
                expected: "transfer_completed".to_string(),
            }));
        }

        record.status = PayoutStatus::PayoutCompleted;
        record.payout_id = Some(payout_id.to_string());
        record.payout_key = Some(payout_key.to_string());
        record.processed_at = Some(processed_at);
        Ok(record.clone())
    }

    async fn mark_payout_failed(&self, record_id: Uuid, reason: &str) -> AppResult<()> {
        let mut payouts = self.payouts.write().await;
        let record = payouts
            .get_mut(&record_id)
            .ok_or_else(|| AppError::Payout(PayoutError::NotFound(record_id.to_string())))?;

        if record.status.is_terminal() {
            return Err(AppError::Payout(PayoutError::InvalidState {
                current: record.status.to_string(),
                expected: "non-terminal".to_string(),
            }));
        }

        record.status = PayoutStatus::Failed;
        record.notes = Some(match record.notes.take() {
            Some(existing) => format!("{} | {}", existing, reason),
            None => reason.to_string(),
        });
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn append_notes(&self, record_id: Uuid, note: &str) -> AppResult<()> {
        let mut payouts = self.payouts.write().await;
        let record = payouts
            .get_mut(&record_id)
            .ok_or_else(|| AppError::Payout(PayoutError::NotFound(record_id.to_string())))?;

        record.notes = Some(match record.notes.take() {
            Some(existing) => format!("{} | {}", existing, note),
            None => note.to_string(),
        });
        Ok(())
    }

    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<PayoutRecord>> {
        let mut records: Vec<PayoutRecord> = self
            .payouts
            .read()
            .await
            .values()
            .filter(|p| p.seller_id == seller_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn credit(amount: Decimal) -> SettlementCredit {
        SettlementCredit {
            gross_sale: amount,
            commission: Decimal::ZERO,
            net_revenue: amount,
            pending_credit: amount,
        }
    }

    #[tokio::test]
    async fn test_move_to_available_conserves_total() {
        let ledger = MemorySellerLedger::new();
        let seller = Uuid::new_v4();

        ledger.credit(seller, credit(dec!(100))).await.unwrap();
        ledger.move_to_available(seller, dec!(40)).await.unwrap();

        let b = ledger.get(seller).await.unwrap().unwrap();
        assert_eq!(b.pending_balance, dec!(60));
        assert_eq!(b.available_balance, dec!(40));
        assert_eq!(b.pending_balance + b.available_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_debit_beyond_available_fails() {
        let ledger = MemorySellerLedger::new();
        let seller = Uuid::new_v4();

        ledger.credit(seller, credit(dec!(50))).await.unwrap();
        ledger.move_to_available(seller, dec!(50)).await.unwrap();

        let err = ledger.debit(seller, dec!(51)).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));

        // No state change
        let b = ledger.get(seller).await.unwrap().unwrap();
        assert_eq!(b.available_balance, dec!(50));
    }

    #[tokio::test]
    async fn test_ledger_conservation_over_operation_sequence() {
        let ledger = MemorySellerLedger::new();
        let seller = Uuid::new_v4();

        let credits = [dec!(100), dec!(35.50), dec!(0.49)];
        for c in credits {
            ledger.credit(seller, credit(c)).await.unwrap();
        }
        ledger.move_to_available(seller, dec!(80)).await.unwrap();
        ledger.move_to_available(seller, dec!(20)).await.unwrap();

        // Simulate one completed payout of 60
        let record = ledger.insert_payout(seller, dec!(60), None).await.unwrap();
        ledger
            .mark_transfer_completed(record.id, "tr_1")
            .await
            .unwrap();
        ledger.debit(seller, dec!(60)).await.unwrap();
        ledger
            .mark_payout_completed(record.id, "po_1", "payout:key", Utc::now())
            .await
            .unwrap();

        let b = ledger.get(seller).await.unwrap().unwrap();
        let completed: Decimal = ledger
            .payouts_for_seller(seller)
            .await
            .unwrap()
            .iter()
            .filter(|p| p.status == PayoutStatus::PayoutCompleted)
            .map(|p| p.amount)
            .sum();

        let credited: Decimal = credits.iter().copied().sum();
        assert_eq!(b.pending_balance + b.available_balance + completed, credited);
    }

    #[tokio::test]
    async fn test_second_open_payout_rejected() {
        let ledger = MemorySellerLedger::new();
        let seller = Uuid::new_v4();

        ledger.insert_payout(seller, dec!(10), None).await.unwrap();
        let err = ledger
            .insert_payout(seller, dec!(5), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payout(PayoutError::TransferInFlight(_))
        ));
    }
}
