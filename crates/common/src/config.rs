use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

const DEFAULT_FAPI_URL: &str = "https://fapi.binance.com";
const DEFAULT_SETTINGS_PATH: &str = "config/scanner.toml";
const MAX_TELEGRAM_BOTS: usize = 8;

/// One Telegram bot/chat pair that receives alerts.
#[derive(Clone)]
pub struct TelegramTarget {
    pub name: String,
    pub token: String,
    pub chat_id: i64,
}

impl std::fmt::Debug for TelegramTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTarget")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Deployment configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub binance_fapi_url: String,
    pub binance_api_key: Option<String>,

    // Notification sinks
    pub telegram_targets: Vec<TelegramTarget>,

    // Tunables file
    pub settings_path: String,
    /// False when `settings_path` is the built-in default, which may be absent.
    pub settings_path_explicit: bool,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// if one is present.
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal in production.
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::Config(format!("failed to read .env: {e}")));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut telegram_targets = Vec::new();
        for n in 1..=MAX_TELEGRAM_BOTS {
            let token_key = format!("TELEGRAM_BOT{n}_TOKEN");
            let chat_key = format!("TELEGRAM_BOT{n}_CHAT_ID");
            match (optional(&token_key), optional(&chat_key)) {
                (Some(token), Some(chat)) => {
                    let chat_id = chat.parse::<i64>().map_err(|_| {
                        Error::Config(format!("{chat_key} contains non-numeric ID: '{chat}'"))
                    })?;
                    telegram_targets.push(TelegramTarget {
                        name: format!("telegram-{n}"),
                        token,
                        chat_id,
                    });
                }
                (Some(_), None) => {
                    return Err(Error::Config(format!("{token_key} is set but {chat_key} is not")));
                }
                (None, Some(_)) => {
                    return Err(Error::Config(format!("{chat_key} is set but {token_key} is not")));
                }
                (None, None) => {}
            }
        }
        if telegram_targets.is_empty() {
            return Err(Error::Config(
                "no alert sink configured: set TELEGRAM_BOT1_TOKEN and TELEGRAM_BOT1_CHAT_ID"
                    .to_string(),
            ));
        }

        let explicit_path = optional("SCANNER_CONFIG_PATH");

        Ok(Config {
            binance_fapi_url: optional("BINANCE_FAPI_URL")
                .unwrap_or_else(|| DEFAULT_FAPI_URL.to_string()),
            binance_api_key: optional("BINANCE_API_KEY"),
            telegram_targets,
            settings_path_explicit: explicit_path.is_some(),
            settings_path: explicit_path.unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string()),
        })
    }

    /// Load and validate the tunables file this configuration points at.
    pub fn load_settings(&self) -> Result<Settings> {
        let path = Path::new(&self.settings_path);
        if !path.exists() && !self.settings_path_explicit {
            info!(path = %self.settings_path, "No scanner settings file, using defaults");
            return Ok(Settings::default());
        }
        Settings::load(path)
    }
}

/// Tunables file (TOML). Every section and key is optional.
///
/// Example `config/scanner.toml`:
/// ```toml
/// [indicator]
/// rsi_period = 12
///
/// [rules]
/// high = 90.0
/// high_mean = 85.0
///
/// [scan]
/// batch_size = 40
/// max_concurrent = 10
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub indicator: IndicatorSettings,
    pub rules: SignalRules,
    pub scan: ScanSettings,
    pub alert: AlertSettings,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read scanner settings at '{}': {e}", path.display()))
        })?;
        let settings = Self::from_toml_str(&content).map_err(|e| {
            Error::Config(format!("invalid scanner settings at '{}': {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loaded scanner settings");
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.indicator.rsi_period < 2 {
            return fail("indicator.rsi_period must be >= 2");
        }
        if self.exchange.kline_limit <= self.indicator.rsi_period {
            return fail("exchange.kline_limit must exceed indicator.rsi_period");
        }
        if self.exchange.max_requests_per_window == 0 || self.exchange.window_secs == 0 {
            return fail("exchange request budget must be non-zero");
        }
        if self.scan.batch_size == 0 || self.scan.max_concurrent == 0 {
            return fail("scan.batch_size and scan.max_concurrent must be >= 1");
        }
        let r = &self.rules;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if ![r.high, r.high_mean, r.low, r.low_wide].into_iter().all(in_range) {
            return fail("rule thresholds must lie within [0, 100]");
        }
        if r.low >= r.high || r.low_wide >= r.high_mean {
            return fail("low thresholds must sit below high thresholds");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Quote asset every scanned contract must settle in.
    pub quote_asset: String,
    /// Base assets never scanned (stablecoins, fiat, majors).
    pub denylist: Vec<String>,
    /// Candles requested per timeframe.
    pub kline_limit: usize,
    pub max_requests_per_window: u32,
    pub window_secs: u64,
    /// Pause after every successful request.
    pub request_cooldown_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    /// Linear backoff base: retry `n` waits `n * retry_base_delay_secs`.
    pub retry_base_delay_secs: u64,
    /// Wait used when a 429/418 carries no Retry-After header.
    pub default_retry_after_secs: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            denylist: [
                "USDC", "BUSD", "TUSD", "USDP", "DAI", "FDUSD", "USTC", "UST", "EURS", "PAX",
                "EUR", "GBP", "JPY", "AUD", "BTC", "ETH",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            kline_limit: 50,
            max_requests_per_window: 1000,
            window_secs: 60,
            request_cooldown_ms: 50,
            request_timeout_secs: 10,
            max_retries: 2,
            retry_base_delay_secs: 5,
            default_retry_after_secs: 60,
        }
    }
}

impl ExchangeSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn request_cooldown(&self) -> Duration {
        Duration::from_millis(self.request_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn is_denied(&self, base_asset: &str) -> bool {
        self.denylist.iter().any(|d| d.eq_ignore_ascii_case(base_asset))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self { rsi_period: 12 }
    }
}

/// Thresholds for the HIGH and LOW multi-timeframe rules.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalRules {
    /// 5m and 15m RSI must both reach this for a HIGH signal.
    pub high: f64,
    /// Mean of all four RSIs must reach this for a HIGH signal.
    pub high_mean: f64,
    /// 5m and 15m RSI must both be at or below this for a LOW signal.
    pub low: f64,
    /// 1h and 4h RSI must both be at or below this for a LOW signal.
    pub low_wide: f64,
}

impl Default for SignalRules {
    fn default() -> Self {
        Self {
            high: 90.0,
            high_mean: 85.0,
            low: 7.0,
            low_wide: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanSettings {
    pub batch_size: usize,
    /// Symbol pipelines allowed in flight at once.
    pub max_concurrent: usize,
    pub batch_pause_ms: u64,
    pub target_cadence_secs: u64,
    pub min_sleep_secs: u64,
    pub error_cooldown_secs: u64,
    pub shuffle: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: 40,
            max_concurrent: 10,
            batch_pause_ms: 5_000,
            target_cadence_secs: 120,
            min_sleep_secs: 60,
            error_cooldown_secs: 60,
            shuffle: true,
        }
    }
}

impl ScanSettings {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    /// Sleep after a completed cycle: `max(target - elapsed, floor)`.
    pub fn cycle_pause(&self, elapsed: Duration) -> Duration {
        Duration::from_secs(self.target_cadence_secs)
            .saturating_sub(elapsed)
            .max(Duration::from_secs(self.min_sleep_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Retries after a send timeout. Rate-limit waits are not counted.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Added on top of a sink's retry-after hint.
    pub retry_margin_secs: u64,
    pub post_send_pause_secs: u64,
    pub send_timeout_secs: u64,
    /// Last line of every alert. An empty string leaves it off.
    pub signature: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
            retry_margin_secs: 2,
            post_send_pause_secs: 2,
            send_timeout_secs: 30,
            signature: Some("ScalpingPA".to_string()),
        }
    }
}

impl AlertSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn retry_margin(&self) -> Duration {
        Duration::from_secs(self.retry_margin_secs)
    }

    pub fn post_send_pause(&self) -> Duration {
        Duration::from_secs(self.post_send_pause_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
