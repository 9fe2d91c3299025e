// Two-phase payout protocol against the external payment rail.
//
//   REQUESTED -> TRANSFER_COMPLETED -> PAYOUT_COMPLETED
//                                      FAILED (terminal, any state)
//
// The transfer step moves funds into the platform-held intermediary state;
// the payout step disburses to the seller's bank and debits the ledger.
// Records are addressed by id, and both steps carry idempotency keys
// derived from stable identifiers, so a retry after an ambiguous failure
// reuses the same key instead of issuing a duplicate external call.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{to_minor_units, PayoutStep};
use crate::error::{AppError, AppResult, PayoutError, RailError};
use crate::ledger::models::{PayoutRecord, PayoutStatus};
use crate::ledger::SellerLedger;
use crate::rail::{PaymentRail, PayoutRequest, RailMetadata, TransferRequest};
use crate::stores::StoreRepository;

pub struct PayoutOrchestrator {
    ledger: Arc<dyn SellerLedger>,
    stores: Arc<dyn StoreRepository>,
    rail: Arc<dyn PaymentRail>,
    currency: String,
}

impl PayoutOrchestrator {
    pub fn new(
        ledger: Arc<dyn SellerLedger>,
        stores: Arc<dyn StoreRepository>,
        rail: Arc<dyn PaymentRail>,
        currency: String,
    ) -> Self {
        Self {
            ledger,
            stores,
            rail,
            currency,
        }
    }

    /// Step one: move `amount` into the platform-held state on the rail.
    /// Preconditions (all checked before any external call): the seller has
    /// a connected rail account, `amount <= available_balance`, and no
    /// other payout is in flight. Does not debit the balance yet.
    pub async fn request_transfer(
        &self,
        seller_id: Uuid,
        amount: Decimal,
        notes: Option<String>,
    ) -> AppResult<PayoutRecord> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Transfer amount must be positive, got {}",
                amount
            )));
        }

        let store = self
            .stores
            .get(seller_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("store {}", seller_id)))?;
        let account_id = store.payment_account_id.clone().ok_or_else(|| {
            AppError::Payout(PayoutError::NoPaymentAccount(seller_id.to_string()))
        })?;

        let balance = self
            .ledger
            .get(seller_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("seller balance {}", seller_id)))?;
        if amount > balance.available_balance {
            return Err(AppError::InsufficientBalance {
                requested: amount.to_string(),
                available: balance.available_balance.to_string(),
            });
        }

        // Reuse a stalled REQUESTED record (earlier attempt failed before
        // the rail confirmed) so the retry carries the same idempotency
        // key. Anything else in flight is a conflict.
        let record = match self.ledger.open_payout_for_seller(seller_id).await? {
            Some(existing) if existing.status == PayoutStatus::Requested => {
                if existing.amount != amount {
                    return Err(AppError::Payout(PayoutError::TransferInFlight(
                        seller_id.to_string(),
                    )));
                }
                if let Some(note) = &notes {
                    self.ledger.append_notes(existing.id, note).await?;
                }
                info!(
                    "Resuming transfer for seller {} with key {}",
                    seller_id, existing.transfer_key
                );
                existing
            }
            Some(_) => {
                return Err(AppError::Payout(PayoutError::TransferInFlight(
                    seller_id.to_string(),
                )))
            }
            None => self.ledger.insert_payout(seller_id, amount, notes).await?,
        };

        let request = TransferRequest {
            amount_minor: to_minor_units(amount)?,
            currency: self.currency.clone(),
            destination_account_id: account_id,
            metadata: RailMetadata::marketplace_payout(seller_id, PayoutStep::Transfer),
            idempotency_key: record.transfer_key.clone(),
        };

        match self.rail.create_transfer(request).await {
            Ok(transfer_id) => {
                let record = self
                    .ledger
                    .mark_transfer_completed(record.id, &transfer_id)
                    .await?;
                info!(
                    "Transfer completed for seller {}: {} ({})",
                    seller_id, amount, transfer_id
                );
                Ok(record)
            }
            Err(err @ RailError::Rejected { .. }) => {
                // The rail refused outright; the record is dead
                self.ledger
                    .mark_payout_failed(record.id, &err.to_string())
                    .await?;
                Err(err.into())
            }
            Err(err) => {
                // Ambiguous or transient: leave the record REQUESTED so a
                // retry reuses the same idempotency key
                warn!(
                    "Transfer for seller {} left in requested state: {}",
                    seller_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Step two: disburse a completed transfer to the seller's bank and
    /// debit the available balance. The record is selected by `payout_id`
    /// when given; otherwise the seller's unique open TRANSFER_COMPLETED
    /// record is resolved. A record that already completed is returned
    /// as-is without a second rail call.
    pub async fn request_payout(
        &self,
        seller_id: Uuid,
        payout_id: Option<Uuid>,
        notes: Option<String>,
    ) -> AppResult<PayoutRecord> {
        let record = match payout_id {
            Some(id) => {
                let record = self
                    .ledger
                    .find_payout(id)
                    .await?
                    .ok_or_else(|| AppError::Payout(PayoutError::NotFound(id.to_string())))?;
                if record.seller_id != seller_id {
                    return Err(AppError::InvalidInput(format!(
                        "Payout {} does not belong to seller {}",
                        id, seller_id
                    )));
                }
                record
            }
            None => self
                .ledger
                .open_transfer_for_seller(seller_id)
                .await?
                .ok_or(AppError::Payout(PayoutError::NoCompletedTransfer))?,
        };

        match record.status {
            PayoutStatus::TransferCompleted => {}
            // Idempotent re-request: the work is already done; only the
            // notes still accept input
            PayoutStatus::PayoutCompleted => {
                if let Some(note) = &notes {
                    self.ledger.append_notes(record.id, note).await?;
                    return Ok(self
                        .ledger
                        .find_payout(record.id)
                        .await?
                        .unwrap_or(record));
                }
                return Ok(record);
            }
            other => {
                return Err(AppError::Payout(PayoutError::InvalidState {
                    current: other.to_string(),
                    expected: "transfer_completed".to_string(),
                }))
            }
        }

        if let Some(note) = &notes {
            self.ledger.append_notes(record.id, note).await?;
        }

        let store = self
            .stores
            .get(seller_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("store {}", seller_id)))?;
        let account_id = store.payment_account_id.clone().ok_or_else(|| {
            AppError::Payout(PayoutError::NoPaymentAccount(seller_id.to_string()))
        })?;

        let transfer_id = record.transfer_id.clone().ok_or_else(|| {
            AppError::Internal(format!(
                "Payout {} is transfer_completed without a transfer id",
                record.id
            ))
        })?;
        let payout_key = PayoutRecord::derive_payout_key(seller_id, &transfer_id);

        let request = PayoutRequest {
            amount_minor: to_minor_units(record.amount)?,
            currency: self.currency.clone(),
            on_behalf_of_account_id: account_id,
            metadata: RailMetadata::marketplace_payout(seller_id, PayoutStep::Payout),
            idempotency_key: payout_key.clone(),
        };

        match self.rail.create_payout(request).await {
            Ok(rail_payout_id) => {
                // Debit before recording completion; if the debit fails the
                // record stays TRANSFER_COMPLETED and the retry reuses the
                // same key, which the rail deduplicates
                self.ledger.debit(seller_id, record.amount).await?;
                let record = self
                    .ledger
                    .mark_payout_completed(record.id, &rail_payout_id, &payout_key, Utc::now())
                    .await?;
                info!(
                    "Payout completed for seller {}: {} ({})",
                    seller_id, record.amount, rail_payout_id
                );
                Ok(record)
            }
            Err(err @ RailError::Rejected { .. }) => {
                self.ledger
                    .mark_payout_failed(record.id, &err.to_string())
                    .await?;
                Err(err.into())
            }
            Err(err) => {
                warn!(
                    "Payout for seller {} left in transfer_completed state: {}",
                    seller_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Create a connected rail account for a store and hand back the
    /// onboarding link
    pub async fn connect_account(&self, store_id: Uuid, email: &str) -> AppResult<(String, String)> {
        let store = self
            .stores
            .get(store_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;

        if let Some(existing) = store.payment_account_id {
            let link = self.rail.create_onboarding_link(&existing).await?;
            return Ok((existing, link));
        }

        let account_id = self.rail.create_connected_account(email).await?;
        self.stores.set_payment_account(store_id, &account_id).await?;
        let link = self.rail.create_onboarding_link(&account_id).await?;
        Ok((account_id, link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::SettlementCredit;
    use crate::ledger::MemorySellerLedger;
    use crate::rail::mock::MockPaymentRail;
    use crate::stores::MemoryStoreRepository;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    struct Fixture {
        ledger: Arc<MemorySellerLedger>,
        rail: Arc<MockPaymentRail>,
        orchestrator: PayoutOrchestrator,
        seller: Uuid,
    }

    async fn fixture(available: Decimal) -> Fixture {
        let ledger = Arc::new(MemorySellerLedger::new());
        let stores = Arc::new(MemoryStoreRepository::new());
        let rail = Arc::new(MockPaymentRail::new());
        let seller = Uuid::new_v4();

        stores.insert(MemoryStoreRepository::store(seller, "acme")).await;

        if available > Decimal::ZERO {
            ledger
                .credit(
                    seller,
                    SettlementCredit {
                        gross_sale: available,
                        commission: Decimal::ZERO,
                        net_revenue: available,
                        pending_credit: available,
                    },
                )
                .await
                .unwrap();
            ledger.move_to_available(seller, available).await.unwrap();
        }

        let orchestrator = PayoutOrchestrator::new(
            ledger.clone(),
            stores.clone(),
            rail.clone(),
            "usd".to_string(),
        );

        Fixture {
            ledger,
            rail,
            orchestrator,
            seller,
        }
    }

    #[tokio::test]
    async fn test_happy_path_two_steps() {
        let f = fixture(dec!(100)).await;

        let record = f
            .orchestrator
            .request_transfer(f.seller, dec!(60), Some("weekly".into()))
            .await
            .unwrap();
        assert_eq!(record.status, PayoutStatus::TransferCompleted);
        assert!(record.transfer_id.is_some());

        // Transfer does not debit
        let balance = f.ledger.get(f.seller).await.unwrap().unwrap();
        assert_eq!(balance.available_balance, dec!(100));

        let record = f
            .orchestrator
            .request_payout(f.seller, Some(record.id), None)
            .await
            .unwrap();
        assert_eq!(record.status, PayoutStatus::PayoutCompleted);
        assert!(record.payout_id.is_some());
        assert!(record.processed_at.is_some());

        let balance = f.ledger.get(f.seller).await.unwrap().unwrap();
        assert_eq!(balance.available_balance, dec!(40));
    }

    #[tokio::test]
    async fn test_transfer_over_available_fails_without_side_effects() {
        let f = fixture(dec!(50)).await;

        let err = f
            .orchestrator
            .request_transfer(f.seller, dec!(51), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));

        assert_eq!(f.rail.transfer_calls(), 0);
        assert!(f
            .ledger
            .payouts_for_seller(f.seller)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_payment_account_rejected_before_rail() {
        let ledger = Arc::new(MemorySellerLedger::new());
        let stores = Arc::new(MemoryStoreRepository::new());
        let rail = Arc::new(MockPaymentRail::new());
        let seller = Uuid::new_v4();

        let mut store = MemoryStoreRepository::store(seller, "no-rail");
        store.payment_account_id = None;
        stores.insert(store).await;

        let orchestrator =
            PayoutOrchestrator::new(ledger, stores, rail.clone(), "usd".to_string());
        let err = orchestrator
            .request_transfer(seller, dec!(10), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Payout(PayoutError::NoPaymentAccount(_))
        ));
        assert_eq!(rail.transfer_calls(), 0);
    }

    #[tokio::test]
    async fn test_payout_without_transfer_reports_no_completed_transfer() {
        let f = fixture(dec!(100)).await;

        let err = f
            .orchestrator
            .request_payout(f.seller, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payout(PayoutError::NoCompletedTransfer)
        ));
    }

    #[tokio::test]
    async fn test_second_transfer_while_first_unpaid_is_rejected() {
        let f = fixture(dec!(100)).await;

        f.orchestrator
            .request_transfer(f.seller, dec!(30), None)
            .await
            .unwrap();

        let err = f
            .orchestrator
            .request_transfer(f.seller, dec!(30), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payout(PayoutError::TransferInFlight(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_retry_reuses_idempotency_key() {
        let f = fixture(dec!(100)).await;

        f.rail.fail_transfers.store(true, Ordering::SeqCst);
        let err = f
            .orchestrator
            .request_transfer(f.seller, dec!(25), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));

        // Record survives in REQUESTED for a keyed retry
        let open = f
            .ledger
            .open_payout_for_seller(f.seller)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.status, PayoutStatus::Requested);
        let first_key = open.transfer_key.clone();

        f.rail.fail_transfers.store(false, Ordering::SeqCst);
        let record = f
            .orchestrator
            .request_transfer(f.seller, dec!(25), None)
            .await
            .unwrap();

        assert_eq!(record.id, open.id);
        assert_eq!(record.transfer_key, first_key);
        assert_eq!(record.status, PayoutStatus::TransferCompleted);
        assert_eq!(f.rail.transfer_calls(), 1);
    }

    #[tokio::test]
    async fn test_payout_notes_are_appended_to_the_record() {
        let f = fixture(dec!(100)).await;

        let record = f
            .orchestrator
            .request_transfer(f.seller, dec!(60), Some("weekly run".into()))
            .await
            .unwrap();
        let record = f
            .orchestrator
            .request_payout(f.seller, Some(record.id), Some("approved by ops".into()))
            .await
            .unwrap();

        let notes = record.notes.unwrap();
        assert!(notes.contains("weekly run"));
        assert!(notes.contains("approved by ops"));
    }

    #[tokio::test]
    async fn test_resumed_transfer_keeps_both_notes() {
        let f = fixture(dec!(100)).await;

        f.rail.fail_transfers.store(true, Ordering::SeqCst);
        f.orchestrator
            .request_transfer(f.seller, dec!(25), Some("first attempt".into()))
            .await
            .unwrap_err();

        f.rail.fail_transfers.store(false, Ordering::SeqCst);
        let record = f
            .orchestrator
            .request_transfer(f.seller, dec!(25), Some("retry after outage".into()))
            .await
            .unwrap();

        let notes = record.notes.unwrap();
        assert!(notes.contains("first attempt"));
        assert!(notes.contains("retry after outage"));
    }

    #[tokio::test]
    async fn test_completed_payout_re_request_is_idempotent() {
        let f = fixture(dec!(100)).await;

        let record = f
            .orchestrator
            .request_transfer(f.seller, dec!(20), None)
            .await
            .unwrap();
        let done = f
            .orchestrator
            .request_payout(f.seller, Some(record.id), None)
            .await
            .unwrap();

        let again = f
            .orchestrator
            .request_payout(f.seller, Some(record.id), None)
            .await
            .unwrap();

        assert_eq!(again.payout_id, done.payout_id);
        assert_eq!(f.rail.payout_calls(), 1);

        // Balance debited exactly once
        let balance = f.ledger.get(f.seller).await.unwrap().unwrap();
        assert_eq!(balance.available_balance, dec!(80));
    }
}
