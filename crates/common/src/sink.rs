use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// How a notification sink reported a failed send.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("send timed out")]
    Timeout,

    #[error("rate limited, retry after {0:?}")]
    RetryAfter(Duration),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// A destination for alert messages, e.g. one Telegram chat.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<(), SinkError>;
}
