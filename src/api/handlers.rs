use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    fees::FeeCalculator,
    grace::{GraceCheckSummary, GracePeriodService},
    ledger::models::{BalanceFilter, FinancialOverview, PayoutRecord, SettlementCredit},
    ledger::SellerLedger,
    payout::PayoutOrchestrator,
    stores::{Store, StoreRepository},
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn SellerLedger>,
    pub stores: Arc<dyn StoreRepository>,
    pub fee_calculator: Arc<FeeCalculator>,
    pub orchestrator: Arc<PayoutOrchestrator>,
    pub grace: Arc<GracePeriodService>,
}

fn validated<T: Validate>(request: &T) -> AppResult<()> {
    request.validate().map_err(|e| {
        let errors = e
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| e.message.as_ref().map(|m| m.to_string()).unwrap_or_default())
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");
        AppError::InvalidInput(format!("Validation failed: {}", errors))
    })
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /financial/overview?period=
pub async fn get_financial_overview(
    State(state): State<AppState>,
    Query(query): Query<OverviewQuery>,
) -> AppResult<Json<FinancialOverview>> {
    let since = parse_period(query.period.as_deref(), Utc::now())?;
    let overview = state.ledger.overview(since).await?;
    Ok(Json(overview))
}

/// GET /financial/seller-balances
pub async fn list_seller_balances(
    State(state): State<AppState>,
    Query(query): Query<BalanceListQuery>,
) -> AppResult<Json<BalanceListResponse>> {
    let filter = BalanceFilter {
        search: query.search,
        store_type: query.store_type,
        min_balance: query.min_balance,
        max_balance: query.max_balance,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };

    let (balances, total) = state.ledger.list(&filter).await?;
    Ok(Json(BalanceListResponse {
        balances,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// POST /financial/settle-order
///
/// Invoked on payment confirmation: decomposes the checkout into
/// per-seller breakdowns and credits each seller's pending balance.
pub async fn settle_order(
    State(state): State<AppState>,
    Json(request): Json<SettleOrderRequest>,
) -> AppResult<Json<SettleOrderResponse>> {
    validated(&request)?;
    info!(
        "Settling order {} across {} suborders",
        request.order_id,
        request.suborders.len()
    );

    let breakdown = state
        .fee_calculator
        .compute_multi_seller_fees(&request.suborders, request.gross_up_fees)?;

    for (seller_id, suborder) in &breakdown.suborders {
        state
            .ledger
            .credit(*seller_id, SettlementCredit::from(suborder))
            .await?;
    }

    Ok(Json(SettleOrderResponse {
        order_id: request.order_id,
        breakdown,
    }))
}

/// POST /financial/release-funds
pub async fn release_funds(
    State(state): State<AppState>,
    Json(request): Json<ReleaseFundsRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .ledger
        .move_to_available(request.seller_id, request.amount)
        .await?;
    info!(
        "Released {} to available for seller {}",
        request.amount, request.seller_id
    );
    Ok(Json(serde_json::json!({
        "seller_id": request.seller_id,
        "released": request.amount.to_string(),
    })))
}

/// POST /financial/transfer-funds
pub async fn transfer_funds(
    State(state): State<AppState>,
    Json(request): Json<TransferFundsRequest>,
) -> AppResult<Json<PayoutResponse>> {
    let payout = state
        .orchestrator
        .request_transfer(request.seller_id, request.amount, request.notes)
        .await?;

    Ok(Json(PayoutResponse {
        payout,
        message: "Transfer completed; funds are platform-held pending payout".to_string(),
    }))
}

/// POST /financial/process-payout
pub async fn process_payout(
    State(state): State<AppState>,
    Json(request): Json<ProcessPayoutRequest>,
) -> AppResult<Json<PayoutResponse>> {
    let payout = state
        .orchestrator
        .request_payout(request.seller_id, request.payout_id, request.notes)
        .await?;

    Ok(Json(PayoutResponse {
        payout,
        message: "Payout disbursed to the seller's bank".to_string(),
    }))
}

/// GET /financial/sellers/:seller_id/payouts
pub async fn get_seller_payouts(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> AppResult<Json<Vec<PayoutRecord>>> {
    Ok(Json(state.ledger.payouts_for_seller(seller_id).await?))
}

/// POST /grace-period/check-now
pub async fn grace_check_now(
    State(state): State<AppState>,
) -> AppResult<Json<GraceCheckSummary>> {
    info!("Operator triggered grace-period check");
    let summary = state.grace.run_check().await?;
    Ok(Json(summary))
}

/// POST /grace-period/initialize/:store_id
pub async fn initialize_grace_period(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<InitializeGraceRequest>,
) -> AppResult<Json<Store>> {
    let activation = request.activation_date.unwrap_or_else(Utc::now);
    let store = state
        .grace
        .initialize_grace_period(store_id, activation)
        .await?;
    Ok(Json(store))
}

/// POST /grace-period/store/:store_id/send-warning
pub async fn send_grace_warning(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<SendWarningRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if request.days_remaining < 0 {
        return Err(AppError::InvalidInput(
            "days_remaining must be non-negative".to_string(),
        ));
    }

    let sent = state
        .grace
        .force_send_warning(store_id, request.days_remaining, request.force_notification)
        .await?;
    Ok(Json(serde_json::json!({ "store_id": store_id, "sent": sent })))
}

/// POST /grace-period/store/:store_id/activate-fees
pub async fn activate_store_fees(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<ActivateFeesRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let activated = state
        .grace
        .force_activate_fees(store_id, request.send_notification)
        .await?;
    Ok(Json(
        serde_json::json!({ "store_id": store_id, "activated": activated }),
    ))
}

/// POST /sellers/:store_id/connect-account
pub async fn connect_account(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<ConnectAccountRequest>,
) -> AppResult<Json<ConnectAccountResponse>> {
    validated(&request)?;
    let (account_id, onboarding_url) = state
        .orchestrator
        .connect_account(store_id, &request.email)
        .await?;
    Ok(Json(ConnectAccountResponse {
        account_id,
        onboarding_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_period() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(parse_period(None, now).unwrap(), None);
        assert_eq!(parse_period(Some("all"), now).unwrap(), None);
        assert_eq!(
            parse_period(Some("7d"), now).unwrap(),
            Some(now - chrono::Duration::days(7))
        );
        assert!(parse_period(Some("1y"), now).is_err());
    }
}
