pub mod http;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;

use crate::error::AppResult;

pub use http::HttpNotifier;

/// Fire-and-forget email delivery. Implementations report success or
/// failure; callers decide whether a failure matters. State transitions
/// attached to a notification never roll back on delivery failure.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}
