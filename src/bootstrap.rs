use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::AppState,
    config::Config,
    error::AppResult,
    fees::FeeCalculator,
    grace::{GracePeriodScheduler, GracePeriodService, SystemClock},
    ledger::PgSellerLedger,
    notify::HttpNotifier,
    payout::PayoutOrchestrator,
    rail::HttpPaymentRail,
    stores::PgStoreRepository,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing settlement components ...");

    let pool = initialize_database(&config.database_url).await?;

    // Core components
    let ledger = Arc::new(PgSellerLedger::new(pool.clone()));
    let stores = Arc::new(PgStoreRepository::new(pool));
    let fee_calculator = Arc::new(FeeCalculator::new(config.fees));
    info!(
        "Fee calculator ready: commission {}, processor {} + {}",
        config.fees.platform_fee_pct,
        config.fees.processor_pct_fee,
        config.fees.processor_fixed_fee
    );

    let rail = Arc::new(HttpPaymentRail::new(&config.rail)?);
    info!("Payment rail client ready: {}", config.rail.base_url);

    let notifier = Arc::new(HttpNotifier::new(&config.notifier)?);

    let orchestrator = Arc::new(PayoutOrchestrator::new(
        ledger.clone(),
        stores.clone(),
        rail,
        config.rail.currency.clone(),
    ));

    let grace = Arc::new(GracePeriodService::new(
        stores.clone(),
        notifier,
        Arc::new(SystemClock),
        config.grace_period_days,
    ));
    info!(
        "Grace-period service ready: {} day window",
        config.grace_period_days
    );

    // Daily grace-period check in the background
    let scheduler = GracePeriodScheduler::new(grace.clone(), config.settlement_check_hour_utc);
    let _check_task = scheduler.start();
    info!(
        "Grace-period scheduler started (daily at {:02}:00 UTC)",
        config.settlement_check_hour_utc
    );

    Ok(AppState {
        ledger,
        stores,
        fee_calculator,
        orchestrator,
        grace,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
