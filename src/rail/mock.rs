// Scriptable in-memory rail for orchestrator tests. Calls are deduplicated
// by idempotency key the way the real rail is.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

use super::{PaymentRail, PayoutRequest, TransferRequest};
use crate::error::{AppResult, RailEffect, RailError};
use crate::payout::models::PayoutStep;

#[derive(Default)]
pub struct MockPaymentRail {
    pub fail_transfers: AtomicBool,
    pub fail_payouts: AtomicBool,
    transfer_calls: AtomicU32,
    payout_calls: AtomicU32,
    /// idempotency key -> issued id
    issued: Mutex<HashMap<String, String>>,
}

impl MockPaymentRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer_calls(&self) -> u32 {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    pub fn payout_calls(&self) -> u32 {
        self.payout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRail for MockPaymentRail {
    async fn create_connected_account(&self, email: &str) -> AppResult<String> {
        Ok(format!("acct_{}", email.len()))
    }

    async fn create_onboarding_link(&self, account_id: &str) -> AppResult<String> {
        Ok(format!("https://rail.test/onboard/{}", account_id))
    }

    async fn create_transfer(&self, request: TransferRequest) -> Result<String, RailError> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(RailError::Failed {
                seller_id: request.metadata.seller_id.to_string(),
                step: PayoutStep::Transfer,
                idempotency_key: request.idempotency_key,
                effect: RailEffect::NotApplied,
                message: "mock transfer failure".to_string(),
            });
        }

        let mut issued = self.issued.lock().await;
        if let Some(existing) = issued.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("tr_{}", issued.len() + 1);
        issued.insert(request.idempotency_key, id.clone());
        Ok(id)
    }

    async fn create_payout(&self, request: PayoutRequest) -> Result<String, RailError> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(RailError::Failed {
                seller_id: request.metadata.seller_id.to_string(),
                step: PayoutStep::Payout,
                idempotency_key: request.idempotency_key,
                effect: RailEffect::Unknown,
                message: "mock payout failure".to_string(),
            });
        }

        let mut issued = self.issued.lock().await;
        if let Some(existing) = issued.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("po_{}", issued.len() + 1);
        issued.insert(request.idempotency_key, id.clone());
        Ok(id)
    }
}
