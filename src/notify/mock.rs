use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::Notifier;
use crate::error::{AppError, AppResult};

/// Recording notifier for scheduler tests
#[derive(Default)]
pub struct MockNotifier {
    pub fail_sends: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// (to, subject) pairs in send order
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(AppError::NotificationDelivery(format!(
                "{}: mock delivery failure",
                to
            )));
        }
        self.sent
            .lock()
            .await
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}
