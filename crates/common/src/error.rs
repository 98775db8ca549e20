use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indicator snapshot for {0} is missing timeframes")]
    IncompleteSnapshot(String),
}

impl Error {
    /// Whether the failed request is worth repeating after a backoff delay.
    /// Rate-limit responses are handled separately and are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout | Error::Network(_) => true,
            Error::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
