use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::info;

use common::{AlertSink, Error, Result, SinkError, TelegramTarget};

/// Delivers alerts to one Telegram chat through the Bot API.
pub struct TelegramSink {
    name: String,
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    /// `timeout` bounds each `sendMessage` request so a stalled connection
    /// surfaces as [`SinkError::Timeout`].
    pub fn new(target: &TelegramTarget, timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build Telegram HTTP client: {e}")))?;

        info!(sink = %target.name, chat_id = target.chat_id, "Telegram sink configured");
        Ok(Self {
            name: target.name.clone(),
            bot: Bot::with_client(target.token.clone(), client),
            chat_id: ChatId(target.chat_id),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> Result<(), SinkError> {
        self.bot
            .send_message(self.chat_id, text)
            .disable_web_page_preview(true)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn classify(err: RequestError) -> SinkError {
    match err {
        RequestError::RetryAfter(wait) => SinkError::RetryAfter(wait),
        RequestError::Network(e) if e.is_timeout() => SinkError::Timeout,
        other => SinkError::Rejected(other.to_string()),
    }
}
