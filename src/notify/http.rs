use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::Notifier;
use crate::config::NotifierConfig;
use crate::error::{AppError, AppResult};

/// Posts messages to an email delivery API (transactional mail service or
/// an internal relay)
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint_url: String,
    from_address: String,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Notifier client: {}", e)))?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&serde_json::json!({
                "from": self.from_address,
                "to": to,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| AppError::NotificationDelivery(format!("{}: {}", to, e)))?;

        if !response.status().is_success() {
            return Err(AppError::NotificationDelivery(format!(
                "{}: delivery API returned {}",
                to,
                response.status()
            )));
        }

        debug!("Sent email to {}: {}", to, subject);
        Ok(())
    }
}
