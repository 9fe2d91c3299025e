use axum::{
    routing::{get, post},
    Router,
};
use http::{HeaderName, HeaderValue};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::api::handlers::{
    activate_store_fees, connect_account, get_financial_overview, get_seller_payouts,
    grace_check_now, health_check, initialize_grace_period, list_seller_balances,
    process_payout, release_funds, send_grace_warning, settle_order, transfer_funds,
};
use crate::api::AppState;

pub async fn create_app(state: AppState) -> Router {
    info!("Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        // Financial/admin surface
        .route("/financial/overview", get(get_financial_overview))
        .route("/financial/seller-balances", get(list_seller_balances))
        .route("/financial/settle-order", post(settle_order))
        .route("/financial/release-funds", post(release_funds))
        .route("/financial/transfer-funds", post(transfer_funds))
        .route("/financial/process-payout", post(process_payout))
        .route(
            "/financial/sellers/:seller_id/payouts",
            get(get_seller_payouts),
        )
        // Grace-period controls
        .route("/grace-period/check-now", post(grace_check_now))
        .route(
            "/grace-period/initialize/:store_id",
            post(initialize_grace_period),
        )
        .route(
            "/grace-period/store/:store_id/send-warning",
            post(send_grace_warning),
        )
        .route(
            "/grace-period/store/:store_id/activate-fees",
            post(activate_store_fees),
        )
        // Payment-rail onboarding
        .route("/sellers/:store_id/connect-account", post(connect_account))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CompressionLayer::new())
                .layer(CorsLayer::very_permissive())
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                )),
        )
        .with_state(state);

    info!("HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
