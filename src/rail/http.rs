// HTTP client for a Stripe-Connect-style payment rail.
//
// Every mutating call carries an Idempotency-Key header, so a retry after
// an ambiguous failure (timeout, 5xx) can never double-move funds. The
// client imposes an explicit request timeout and a bounded retry policy;
// errors are classified by whether the call is known to have not taken
// effect.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use super::{PaymentRail, PayoutRequest, TransferRequest};
use crate::config::RailConfig;
use crate::error::{AppError, AppResult, RailEffect, RailError};
use crate::payout::models::PayoutStep;

pub struct HttpPaymentRail {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct LinkResponse {
    url: String,
}

impl HttpPaymentRail {
    pub fn new(config: &RailConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Payment rail client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            max_retries: config.max_retries.max(1),
        })
    }

    /// POST with idempotency key and bounded retries. Connection errors
    /// (request never sent) are retried immediately; timeouts and 5xx are
    /// retried with the same key, which the rail deduplicates.
    async fn post_idempotent(
        &self,
        path: &str,
        body: &serde_json::Value,
        idempotency_key: &str,
        seller_id: String,
        step: PayoutStep,
    ) -> Result<String, RailError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_effect = RailEffect::NotApplied;
        let mut last_message = String::new();

        for attempt in 1..=self.max_retries {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Idempotency-Key", idempotency_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: IdResponse = response.json().await.map_err(|e| {
                            RailError::Failed {
                                seller_id: seller_id.clone(),
                                step,
                                idempotency_key: idempotency_key.to_string(),
                                effect: RailEffect::Unknown,
                                message: format!("Malformed rail response: {}", e),
                            }
                        })?;
                        return Ok(parsed.id);
                    }

                    let text = response.text().await.unwrap_or_default();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        // The rail rejected the request; nothing moved
                        return Err(RailError::Rejected {
                            seller_id,
                            step,
                            message: format!("{}: {}", status, text),
                        });
                    }

                    // 5xx / 429: the request reached the rail, effect unknown
                    last_effect = RailEffect::Unknown;
                    last_message = format!("{}: {}", status, text);
                    warn!(
                        "Rail {} attempt {}/{} got {}; retrying with same key",
                        step, attempt, self.max_retries, status
                    );
                }
                Err(e) if e.is_timeout() => {
                    last_effect = RailEffect::Unknown;
                    last_message = format!("Request timeout: {}", e);
                    warn!(
                        "Rail {} attempt {}/{} timed out; retrying with same key",
                        step, attempt, self.max_retries
                    );
                }
                Err(e) => {
                    // Connect-level failure: the request was never sent
                    last_effect = RailEffect::NotApplied;
                    last_message = format!("Connection error: {}", e);
                    warn!(
                        "Rail {} attempt {}/{} failed to connect: {}",
                        step, attempt, self.max_retries, e
                    );
                }
            }
        }

        Err(RailError::Failed {
            seller_id,
            step,
            idempotency_key: idempotency_key.to_string(),
            effect: last_effect,
            message: last_message,
        })
    }
}

#[async_trait]
impl PaymentRail for HttpPaymentRail {
    async fn create_connected_account(&self, email: &str) -> AppResult<String> {
        let url = format!("{}/accounts", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&serde_json::json!({
                "type": "express",
                "email": email,
                "capabilities": { "transfers": { "requested": true } },
            }))
            .send()
            .await
            .map_err(|e| RailError::Account(format!("create account: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RailError::Account(format!("{}: {}", status, text)).into());
        }

        let parsed: IdResponse = response
            .json()
            .await
            .map_err(|e| RailError::Account(format!("malformed response: {}", e)))?;

        info!("Created connected account {} for {}", parsed.id, email);
        Ok(parsed.id)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> AppResult<String> {
        let url = format!("{}/account_links", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&serde_json::json!({
                "account": account_id,
                "type": "account_onboarding",
            }))
            .send()
            .await
            .map_err(|e| RailError::Account(format!("onboarding link: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RailError::Account(format!("{}: {}", status, text)).into());
        }

        let parsed: LinkResponse = response
            .json()
            .await
            .map_err(|e| RailError::Account(format!("malformed response: {}", e)))?;
        Ok(parsed.url)
    }

    async fn create_transfer(&self, request: TransferRequest) -> Result<String, RailError> {
        let body = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "destination": request.destination_account_id,
            "metadata": request.metadata,
        });

        self.post_idempotent(
            "/transfers",
            &body,
            &request.idempotency_key,
            request.metadata.seller_id.to_string(),
            PayoutStep::Transfer,
        )
        .await
    }

    async fn create_payout(&self, request: PayoutRequest) -> Result<String, RailError> {
        let body = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "metadata": request.metadata,
        });

        // The on-behalf-of account scopes the payout to the seller's
        // sub-account; Stripe takes it as a header
        let url = format!("{}/payouts", self.base_url);
        let mut last_effect = RailEffect::NotApplied;
        let mut last_message = String::new();
        let seller_id = request.metadata.seller_id.to_string();

        for attempt in 1..=self.max_retries {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Idempotency-Key", &request.idempotency_key)
                .header("Stripe-Account", &request.on_behalf_of_account_id)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: IdResponse =
                            response.json().await.map_err(|e| RailError::Failed {
                                seller_id: seller_id.clone(),
                                step: PayoutStep::Payout,
                                idempotency_key: request.idempotency_key.clone(),
                                effect: RailEffect::Unknown,
                                message: format!("Malformed rail response: {}", e),
                            })?;
                        return Ok(parsed.id);
                    }

                    let text = response.text().await.unwrap_or_default();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(RailError::Rejected {
                            seller_id,
                            step: PayoutStep::Payout,
                            message: format!("{}: {}", status, text),
                        });
                    }

                    last_effect = RailEffect::Unknown;
                    last_message = format!("{}: {}", status, text);
                }
                Err(e) if e.is_timeout() => {
                    last_effect = RailEffect::Unknown;
                    last_message = format!("Request timeout: {}", e);
                }
                Err(e) => {
                    last_effect = RailEffect::NotApplied;
                    last_message = format!("Connection error: {}", e);
                }
            }

            warn!(
                "Rail payout attempt {}/{} failed: {}",
                attempt, self.max_retries, last_message
            );
        }

        Err(RailError::Failed {
            seller_id,
            step: PayoutStep::Payout,
            idempotency_key: request.idempotency_key,
            effect: last_effect,
            message: last_message,
        })
    }
}
